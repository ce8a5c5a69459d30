//! `streamlab-core`: shared building blocks for the media pipeline.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use version::{ExpectedVersion, Versioned};
