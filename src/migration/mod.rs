//! Schema versioning, snapshot migration and recovery.
//!
//! - [`SchemaMigrator`] creates the schema, records its version and carries
//!   durable rows across version changes through a snapshot file
//! - [`RecoveryController`] turns a structural error at runtime into a
//!   migration (or a reset of the embedded database) plus one retry

// Durations are reported as f64 histograms.
#![allow(clippy::cast_precision_loss)]

mod migrator;
mod recovery;
pub mod snapshot;

pub use migrator::{ImportSummary, MigrationOutcome, SchemaMigrator, VERSION_TABLE};
pub use recovery::RecoveryController;
