//! Record versioning for conditional (compare-and-swap) writes.

use crate::error::{DomainError, DomainResult};

/// A record that carries a monotonically increasing version.
///
/// Version `0` means "never persisted". Every successful write bumps it by one.
pub trait Versioned {
    fn version(&self) -> u64;
}

/// Version the stored record must be at for a write to go through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(u64);

impl ExpectedVersion {
    /// The record must not exist yet.
    pub const NEW: Self = Self(0);

    pub fn exact(version: u64) -> Self {
        Self(version)
    }

    /// Expectation for overwriting the copy that was read.
    pub fn of<V: Versioned + ?Sized>(record: &V) -> Self {
        Self(record.version())
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_new(self) -> bool {
        self.0 == 0
    }

    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {}, actual: {actual})",
                self.0
            )))
        }
    }
}
