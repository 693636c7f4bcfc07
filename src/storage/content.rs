//! Hashing and key derivation for deduplicated content.

use sha2::{Digest, Sha256};

use super::{Blob, BlobStore};
use crate::error::AppError;

/// Lowercase hex SHA-256 of `bytes`.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Storage key for deduplicated document content:
/// `documents/{h[0:2]}/{h[2:4]}/{hash}/{filename}`.
pub fn document_key(hash: &str, filename: &str) -> String {
    let (a, b) = match (hash.get(0..2), hash.get(2..4)) {
        (Some(a), Some(b)) => (a, b),
        _ => ("00", "00"),
    };
    format!("documents/{}/{}/{}/{}", a, b, hash, sanitize_filename(filename))
}

/// Make a filename safe to use as a single key segment.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_').trim_start_matches('.');
    if trimmed.is_empty() {
        return "attachment".to_string();
    }
    // Keep at most 100 chars without splitting a code point.
    match trimmed.char_indices().nth(100) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// Fail with `ChecksumMismatch` unless `bytes` hash to `expected`.
pub fn verify_checksum(key: &str, bytes: &[u8], expected: &str) -> Result<(), AppError> {
    let actual = compute_hash(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(AppError::checksum_mismatch(key, expected, &actual))
    }
}

/// Download `key` and verify it against `expected_hash`.
pub async fn download_verified<S>(store: &S, key: &str, expected_hash: &str) -> Result<Blob, AppError>
where
    S: BlobStore + ?Sized,
{
    let blob = store.download(key).await?;
    verify_checksum(key, &blob.bytes, expected_hash)?;
    Ok(blob)
}
