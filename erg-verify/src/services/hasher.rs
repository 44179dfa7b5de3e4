//! Image fingerprinting
//!
//! SHA-256 over the raw image bytes, hex encoded. Identical bytes always
//! produce the same fingerprint, which is what makes client retries
//! detectable as duplicates.

use erg_common::{Error, Result};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded fingerprint
pub const FINGERPRINT_LEN: usize = 64;

/// Compute the content fingerprint of an image
///
/// Empty input is not an image and is rejected rather than hashed.
pub fn fingerprint(image: &[u8]) -> Result<String> {
    if image.is_empty() {
        return Err(Error::InvalidInput("Image is empty".to_string()));
    }

    let hash = format!("{:x}", Sha256::digest(image));
    tracing::debug!(bytes = image.len(), hash = %hash, "Computed image fingerprint");
    Ok(hash)
}

/// Compute a fingerprint on the blocking pool
///
/// Large photos are hashed off the async workers.
pub async fn fingerprint_blocking(image: std::sync::Arc<Vec<u8>>) -> Result<String> {
    tokio::task::spawn_blocking(move || fingerprint(&image))
        .await
        .map_err(|e| Error::Internal(format!("Hash calculation task failed: {}", e)))?
}
