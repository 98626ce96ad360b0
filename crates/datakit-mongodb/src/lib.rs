//! MongoDB data-access layer for datakit
//!
//! Wraps the official driver with a small typed surface:
//! - Composable `Query` filters (`&`, `|`, `!`) and `$text` search
//! - Fluent `Update` builders covering the field-update operators
//! - `DbSet`, a per-collection façade with paging, `$facet` aggregation,
//!   bulk writes, and optional session/transaction forwarding
//!
//! All transport, serialization, and consistency guarantees are the
//! driver's; this crate only shapes the calls.

pub mod connection;
pub mod dbset;
pub mod options;
pub mod query;
pub mod update;
pub mod validation;

pub use connection::{Connection, PoolConfig};
pub use datakit_common::{DataKitError, Result};
pub use dbset::{BulkWriteSummary, DbSet, UpdateOutcome, WriteOp};
pub use options::{
    BulkWriteOptions, FacetOptions, FacetPage, FindOptions, FindOptionsPaging, PagedResult,
};
pub use query::{Query, TextSearchOptions};
pub use update::Update;
pub use validation::{validate_filter, ValidatedCollectionName};
