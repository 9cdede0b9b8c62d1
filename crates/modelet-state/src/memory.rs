//! Replica-wide memory budget for resident models

use modelet_core::{ModeletError, ModeletResult};
use parking_lot::Mutex;
use tracing::debug;

/// Signed available-memory counter with compare-and-debit
///
/// Credits are unconditional; racing bookkeeping can push the counter below
/// zero or above the budget for a while, so readers get a clamped value.
pub struct MemoryBudget {
    total_bytes: u64,
    overcommit_percentage: u32,
    available: Mutex<i64>,
}

impl MemoryBudget {
    pub fn new(total_bytes: u64, overcommit_percentage: u32) -> Self {
        let total = i64::try_from(total_bytes).unwrap_or(i64::MAX);
        Self {
            total_bytes: total as u64,
            overcommit_percentage,
            available: Mutex::new(total),
        }
    }

    /// Reserve `bytes` for `model`, refusing if the counter would go negative
    pub fn try_debit(&self, model: &str, bytes: u64) -> ModeletResult<()> {
        let bytes_signed = i64::try_from(bytes).unwrap_or(i64::MAX);
        let mut available = self.available.lock();
        if available.saturating_sub(bytes_signed) < 0 {
            return Err(ModeletError::InsufficientMemory {
                model: model.to_string(),
                required: bytes,
                available: (*available).max(0) as u64,
            });
        }
        *available -= bytes_signed;
        debug!(model = model, debit = bytes, available = *available, "Memory debited");
        Ok(())
    }

    /// Return `bytes` to the budget
    pub fn credit(&self, bytes: u64) {
        let bytes_signed = i64::try_from(bytes).unwrap_or(i64::MAX);
        let mut available = self.available.lock();
        *available = available.saturating_add(bytes_signed);
        debug!(credit = bytes, available = *available, "Memory credited");
    }

    /// Available bytes, clamped at zero
    pub fn available_bytes(&self) -> u64 {
        (*self.available.lock()).max(0) as u64
    }

    /// The raw counter, possibly negative
    pub fn available_raw(&self) -> i64 {
        *self.available.lock()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes the scheduler may place beyond the budget
    pub fn overcommit_bytes(&self) -> u64 {
        self.total_bytes / 100 * u64::from(self.overcommit_percentage)
            + self.total_bytes % 100 * u64::from(self.overcommit_percentage) / 100
    }

    /// Available memory including the over-commit allowance
    ///
    /// `tracked_bytes` is the footprint of every tracked model, resident or not.
    /// Once that exceeds the budget only the remaining over-commit headroom is
    /// reported.
    pub fn available_with_overcommit(&self, tracked_bytes: u64) -> u64 {
        let overcommit = self.overcommit_bytes();
        if tracked_bytes > self.total_bytes {
            overcommit.saturating_sub(tracked_bytes - self.total_bytes)
        } else {
            self.available_bytes().saturating_add(overcommit)
        }
    }
}
