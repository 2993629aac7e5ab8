use base64::Engine;
use sha2::{Digest, Sha256};

/// SHA-256 of the file bytes, base64-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}
