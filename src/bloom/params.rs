use std::f64::consts::LN_2;

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BloomError {
    #[error("expected item count must be positive")]
    ZeroExpectedItems,
    #[error("false positive rate must lie strictly between 0 and 1, got {0}")]
    InvalidFalsePositiveRate(f64),
    #[error("filter of {bits} bits exceeds the supported size")]
    TooLarge { bits: f64 },
}

/// Sizing of a Bloom filter, derived from the expected item count and the
/// target false-positive rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomParams {
    /// Bit array length `m`.
    pub bits: u64,
    /// Hash function count `k`.
    pub hashes: u32,
    pub expected_items: u64,
    pub false_positive_rate: f64,
}

impl BloomParams {
    /// `m = ceil(-(n ln p) / (ln 2)^2)`, `k = round((m / n) ln 2)` with at
    /// least one hash.
    pub fn optimal(expected_items: u64, false_positive_rate: f64) -> Result<Self, BloomError> {
        if expected_items == 0 {
            return Err(BloomError::ZeroExpectedItems);
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(BloomError::InvalidFalsePositiveRate(false_positive_rate));
        }

        let n = expected_items as f64;
        let bits = (-(n * false_positive_rate.ln()) / (LN_2 * LN_2)).ceil();
        if bits > u64::MAX as f64 / 2.0 {
            return Err(BloomError::TooLarge { bits });
        }
        let bits = (bits as u64).max(1);
        let hashes = ((bits as f64 / n) * LN_2).round().max(1.0) as u32;

        Ok(Self {
            bits,
            hashes,
            expected_items,
            false_positive_rate,
        })
    }

    /// Bit positions for `item`.
    ///
    /// Double hashing over one SHA-256 digest: the first two little-endian
    /// words are the base hashes `h1`, `h2` (forced odd), and the i-th index
    /// is `(h1 + i * h2) mod m`.
    pub fn indices(&self, item: &str) -> Vec<u64> {
        let mut hasher = Sha256::new();
        hasher.update(item.as_bytes());
        let digest = hasher.finalize();

        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let h1 = u64::from_le_bytes(word);
        word.copy_from_slice(&digest[8..16]);
        let h2 = u64::from_le_bytes(word) | 1;

        (0..u64::from(self.hashes))
            .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % self.bits)
            .collect()
    }

    /// Size of the bit array in bytes.
    pub fn memory_bytes(&self) -> u64 {
        self.bits.div_ceil(8)
    }

    /// Expected false-positive rate once `inserted` distinct items were added:
    /// `(1 - e^(-k n / m))^k`.
    pub fn estimated_false_positive_rate(&self, inserted: u64) -> f64 {
        let k = f64::from(self.hashes);
        let exponent = -k * inserted as f64 / self.bits as f64;
        (1.0 - exponent.exp()).powf(k)
    }
}
