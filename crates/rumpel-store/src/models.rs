//! Data models for stored bookkeeping.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Upload bookkeeping, kept separately from the sample rows so it survives
/// retention purges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// When the last batch was confirmed uploaded.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync_at: Option<OffsetDateTime>,
    /// Size of the last confirmed batch.
    pub last_batch_size: Option<u64>,
    /// Samples confirmed uploaded since the database was created.
    pub total_synced: u64,
}
