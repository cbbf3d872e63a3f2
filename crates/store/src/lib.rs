//! SQLite persistence for sheetsync: the import job queue and a
//! [`Repository`](sheetsync_recon::Repository) for configured record targets.

pub mod error;
pub mod jobs;
pub mod records;

pub use error::StoreError;
pub use jobs::JobStore;
pub use records::{RecordLookup, SqliteRecordRepository};
