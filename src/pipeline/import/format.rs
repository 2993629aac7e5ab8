use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ImportError;

/// Document families the pipeline has a driver for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Pdf,
    Word,
    Spreadsheet,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Spreadsheet => "spreadsheet",
        }
    }
}

/// Result of format detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDetection {
    pub file_type: FileType,
    pub mime_type: String,
    pub file_size_bytes: u64,
}

const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100MB

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const XLS_MIME: &str = "application/vnd.ms-excel";

/// Magic-byte document type detection.
///
/// Content decides; the extension is only consulted for OLE2 containers,
/// whose header is shared by legacy Word and Excel files.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentTypeDetector;

impl DocumentTypeDetector {
    pub fn detect(&self, path: &Path) -> Result<FormatDetection, ImportError> {
        if !path.exists() {
            return Err(ImportError::NotFound(path.to_path_buf()));
        }
        let file_size = std::fs::metadata(path)?.len();
        if file_size > MAX_FILE_SIZE {
            return Err(ImportError::FileTooLarge {
                size_mb: file_size as f64 / (1024.0 * 1024.0),
                max_mb: MAX_FILE_SIZE / (1024 * 1024),
            });
        }

        let mut header = [0u8; 8];
        let bytes_read = std::fs::File::open(path)?.read(&mut header)?;
        let header = &header[..bytes_read];

        let (file_type, mime_type) = if header.starts_with(PDF_MAGIC) {
            (FileType::Pdf, "application/pdf")
        } else if header.starts_with(ZIP_MAGIC) {
            inspect_zip(path)?
        } else if header.starts_with(OLE2_MAGIC) {
            inspect_ole2(path)?
        } else {
            return Err(ImportError::UnsupportedFormat(format!(
                "unrecognized content in {}",
                display_name(path)
            )));
        };

        tracing::debug!(
            file = %display_name(path),
            file_type = file_type.as_str(),
            size = file_size,
            "Document type detected"
        );

        Ok(FormatDetection {
            file_type,
            mime_type: mime_type.to_string(),
            file_size_bytes: file_size,
        })
    }
}

/// OOXML packages are ZIP archives; the part names tell them apart.
fn inspect_zip(path: &Path) -> Result<(FileType, &'static str), ImportError> {
    let file = std::fs::File::open(path)?;
    let archive = zip::ZipArchive::new(file)
        .map_err(|e| ImportError::UnsupportedFormat(format!("corrupt ZIP container: {e}")))?;

    let mut is_word = false;
    let mut is_excel = false;
    for name in archive.file_names() {
        match name {
            "word/document.xml" => is_word = true,
            "xl/workbook.xml" => is_excel = true,
            _ => {}
        }
    }

    match (is_word, is_excel) {
        (true, _) => Ok((FileType::Word, DOCX_MIME)),
        (false, true) => Ok((FileType::Spreadsheet, XLSX_MIME)),
        _ => Err(ImportError::UnsupportedFormat(
            "ZIP archive is neither a word-processing nor a spreadsheet document".to_string(),
        )),
    }
}

fn inspect_ole2(path: &Path) -> Result<(FileType, &'static str), ImportError> {
    let guess = mime_guess::from_path(path).first_raw();
    match guess {
        Some(XLS_MIME) => Ok((FileType::Spreadsheet, XLS_MIME)),
        Some(other) => Err(ImportError::UnsupportedFormat(format!(
            "legacy binary document ({other})"
        ))),
        None => Err(ImportError::UnsupportedFormat(
            "legacy binary document without a recognizable extension".to_string(),
        )),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}
