//! Durable local buffer of location samples.
//!
//! This crate provides the SQLite-backed store that sits between the
//! location collector and the uploader: an append-only, insertion-ordered
//! table of samples with an efficient unsynced-tail scan and range purge.
//!
//! # Features
//!
//! - Monotonic sequence ids assigned at write time
//! - Unsynced-tail retrieval in insertion order
//! - Batch sync marking with upload bookkeeping
//! - Age-based purge, independent of sync state
//! - Filtered, paginated queries
//!
//! # Example
//!
//! ```no_run
//! use rumpel_store::Store;
//!
//! let store = Store::open_default()?;
//!
//! let pending = store.unsynced_samples(100)?;
//! println!("{} samples waiting for upload", pending.len());
//! # Ok::<(), rumpel_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::SyncState;
pub use queries::SampleQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/rumpel/locations.db`
/// - macOS: `~/Library/Application Support/rumpel/locations.db`
/// - Windows: `C:\Users\<user>\AppData\Local\rumpel\locations.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("rumpel")
        .join("locations.db")
}
