/// Sanitize natively extracted text before it reaches any heuristic.
/// Strips control characters (keeping newline and tab), replacement
/// characters and zero-width marks, normalizes line endings and trims.
pub fn clean_extracted_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| {
            if *c == '\n' || *c == '\t' {
                return true;
            }
            !c.is_control()
                && !matches!(
                    c,
                    '\u{FFFD}' // Replacement character from broken encodings
                        | '\u{200B}' // Zero-width space
                        | '\u{200C}'
                        | '\u{200D}'
                        | '\u{2060}' // Word joiner
                        | '\u{FEFF}' // BOM
                )
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whitespace-only cleanup used when no model refinement happens.
///
/// Collapses runs of spaces inside a line, drops trailing whitespace,
/// collapses three or more newlines to a single blank line and trims.
/// Never adds, removes or substitutes a non-whitespace character.
pub fn mechanical_cleanup(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| collapse_spaces(line).trim_end().to_string())
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in &lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Collapse runs of two or more spaces to one. Tabs are column separators
/// and are left alone.
fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = false;
    for ch in line.chars() {
        if ch == ' ' {
            if !prev_space {
                out.push(ch);
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_bytes() {
        let clean = clean_extracted_text("Invoice\x00 2024");
        assert_eq!(clean, "Invoice 2024");
    }

    #[test]
    fn strips_control_characters_keeps_layout() {
        let raw = "Total: 500\x01\x02\x03\nName\tQty\tPrice";
        let clean = clean_extracted_text(raw);
        assert_eq!(clean, "Total: 500\nName\tQty\tPrice");
    }

    #[test]
    fn strips_zero_width_and_replacement() {
        let raw = "\u{FEFF}Quar\u{200B}terly\u{FFFD} report";
        assert_eq!(clean_extracted_text(raw), "Quarterly report");
    }

    #[test]
    fn normalizes_line_endings() {
        assert_eq!(clean_extracted_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn keeps_unicode_punctuation() {
        let raw = "Résumé: «prix» 15,50€ \u{2013} 20°C";
        assert_eq!(clean_extracted_text(raw), raw);
    }

    #[test]
    fn empty_and_control_only_inputs() {
        assert_eq!(clean_extracted_text(""), "");
        assert_eq!(clean_extracted_text("\x00\x01\x02"), "");
    }

    #[test]
    fn cleanup_collapses_spaces_and_blank_runs() {
        let raw = "Line  one   here  \n\n\n\nLine two\n\n\nLine three";
        assert_eq!(mechanical_cleanup(raw), "Line one here\n\nLine two\n\nLine three");
    }

    #[test]
    fn cleanup_keeps_tabs_and_single_blank_lines() {
        let raw = "A\tB\tC\n\nD\tE";
        assert_eq!(mechanical_cleanup(raw), raw);
    }

    #[test]
    fn cleanup_changes_only_whitespace() {
        let raw = "  The   quick\tbrown \n\n\n fox  jumps.  ";
        let cleaned = mechanical_cleanup(raw);
        let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(strip(raw), strip(&cleaned));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let once = mechanical_cleanup("a   b\n\n\n\nc  ");
        assert_eq!(mechanical_cleanup(&once), once);
    }
}
