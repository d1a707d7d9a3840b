//! DoS budget guard.
//!
//! Every length prefix the reader trusts enough to allocate for is charged
//! here first. The ceiling applies to one top-level value; exceeding it is
//! fatal for the stream.

use crate::error::{constants, CodecError, Result};
use crate::utils::metrics::global_metrics;

/// Bytes charged per object on top of its field data
pub const OBJECT_OVERHEAD: u64 = 16;

/// Bytes charged per declared field of a descriptor
pub const FIELD_OVERHEAD: u64 = 16;

#[derive(Debug, Clone)]
pub struct Budget {
    ceiling: u64,
    remaining: u64,
}

impl Budget {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            remaining: ceiling,
        }
    }

    /// Restore the full ceiling
    pub fn reset(&mut self) {
        self.remaining = self.ceiling;
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn claimed(&self) -> u64 {
        self.ceiling - self.remaining
    }

    /// Charge `bytes` for `what`; fails before anything is allocated
    pub fn claim(&mut self, bytes: u64, what: &str) -> Result<()> {
        if bytes > self.remaining {
            return Err(CodecError::ResourceExhaustion(format!(
                "{}: {} needs {} bytes, {} of {} left",
                constants::ERR_BUDGET_EXCEEDED,
                what,
                bytes,
                self.remaining,
                self.ceiling
            )));
        }
        self.remaining -= bytes;
        global_metrics().budget_claimed(bytes);
        Ok(())
    }

    /// Charge `count` elements of `width` bytes each
    pub fn claim_elements(&mut self, count: u64, width: u64, what: &str) -> Result<()> {
        let bytes = count.checked_mul(width).ok_or_else(|| {
            CodecError::ResourceExhaustion(format!(
                "{}: {} of {} elements overflows",
                constants::ERR_BUDGET_EXCEEDED,
                what,
                count
            ))
        })?;
        self.claim(bytes, what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_claims_accumulate_until_reset() {
        let mut budget = Budget::new(100);
        budget.claim(60, "array").unwrap();
        assert_eq!(budget.remaining(), 40);
        assert!(matches!(
            budget.claim(41, "string"),
            Err(CodecError::ResourceExhaustion(_))
        ));
        assert_eq!(budget.remaining(), 40);
        budget.reset();
        assert_eq!(budget.remaining(), 100);
        assert_eq!(budget.claimed(), 0);
    }

    #[test]
    fn test_element_claim_overflow() {
        let mut budget = Budget::new(u64::MAX);
        assert!(budget.claim_elements(u64::MAX, 8, "array").is_err());
    }

    #[test]
    fn test_billion_int_array_rejected() {
        let mut budget = Budget::new(16 * 1024 * 1024);
        assert!(budget.claim_elements(1_000_000_000, 4, "int array").is_err());
    }
}
