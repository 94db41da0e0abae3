//! Content fingerprints used as validators and change signals.

use sha2::{Digest, Sha256};

/// Computes SHA-256 fingerprints of report payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintService;

impl FingerprintService {
    pub fn new() -> Self {
        Self
    }

    /// Lowercase hex SHA-256 of the payload
    pub fn compute(&self, payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hex::encode(hasher.finalize())
    }
}
