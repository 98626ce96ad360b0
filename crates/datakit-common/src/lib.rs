//! Shared foundations for the datakit workspace
//!
//! Provides the unified error type used by every datakit crate, plus
//! `ConcurrentList`, a thread-safe list with fire-and-forget writes.

pub mod error;
pub mod list;

pub use error::{DataKitError, Result};
pub use list::ConcurrentList;
