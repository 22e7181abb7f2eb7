//! Main store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use rumpel_types::LocationSample;

use crate::error::{Error, Result};
use crate::models::SyncState;
use crate::queries::SampleQuery;
use crate::schema;

const SAMPLE_COLUMNS: &str =
    "sequence_id, latitude, longitude, horizontal_accuracy, captured_at, synced_at";

/// SQLite-based buffer of location samples.
///
/// Every statement runs under one connection lock, so writers are serialized
/// and readers never observe a partially written row. The store is `Sync`
/// and is meant to be shared behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening location database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an existing database without write access.
    ///
    /// The schema is not touched. Every write through this handle fails
    /// with [`Error::Database`].
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening location database read-only at {}", path.display());
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }
}

/// Convert a timestamp to the stored representation (Unix milliseconds).
/// Whole milliseconds since the epoch, rounded toward the past.
pub(crate) fn to_millis(time: OffsetDateTime) -> i64 {
    time.unix_timestamp_nanos().div_euclid(1_000_000) as i64
}

fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<LocationSample> {
    Ok(LocationSample {
        sequence_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        horizontal_accuracy: row.get(3)?,
        captured_at: from_millis(4, row.get(4)?)?,
        synced_at: row
            .get::<_, Option<i64>>(5)?
            .map(|ms| from_millis(5, ms))
            .transpose()?,
    })
}

// Sample operations
impl Store {
    /// Append a sample and return its assigned sequence id.
    ///
    /// The sample's own `sequence_id` is ignored. Samples with a negative
    /// (or NaN) accuracy are refused with [`Error::InvalidSample`].
    pub fn append(&self, sample: &LocationSample) -> Result<i64> {
        if !(sample.horizontal_accuracy >= 0.0) {
            return Err(Error::InvalidSample(format!(
                "horizontal accuracy {} is negative",
                sample.horizontal_accuracy
            )));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO samples (latitude, longitude, horizontal_accuracy, captured_at, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                sample.latitude,
                sample.longitude,
                sample.horizontal_accuracy,
                to_millis(sample.captured_at),
                sample.synced_at.map(to_millis),
            ],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Appended sample {} at {}", id, sample.coordinate());
        Ok(id)
    }

    /// The sample with the highest sequence id, if any.
    pub fn last_sample(&self) -> Result<Option<LocationSample>> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                &format!("SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY sequence_id DESC LIMIT 1"),
                [],
                sample_from_row,
            )
            .optional()?;
        Ok(sample)
    }

    /// Get a sample by sequence id.
    pub fn get_sample(&self, sequence_id: i64) -> Result<Option<LocationSample>> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                &format!("SELECT {SAMPLE_COLUMNS} FROM samples WHERE sequence_id = ?"),
                [sequence_id],
                sample_from_row,
            )
            .optional()?;
        Ok(sample)
    }

    /// Up to `limit` unsynced samples in ascending sequence order.
    pub fn unsynced_samples(&self, limit: u32) -> Result<Vec<LocationSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM samples WHERE synced_at IS NULL
             ORDER BY sequence_id ASC LIMIT ?"
        ))?;
        let samples = stmt
            .query_map([limit], sample_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// Mark the given samples as uploaded at `at`.
    ///
    /// Ids that no longer exist, or that are already synced, are skipped.
    /// Returns the number of rows updated. The sync bookkeeping is updated in
    /// the same transaction.
    pub fn mark_synced(&self, ids: &[i64], at: OffsetDateTime) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let at_ms = to_millis(at);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE samples SET synced_at = ?1 WHERE sequence_id = ?2 AND synced_at IS NULL",
            )?;
            for id in ids {
                updated += stmt.execute(rusqlite::params![at_ms, id])?;
            }
        }

        if updated > 0 {
            tx.execute(
                "INSERT INTO sync_state (id, last_sync_at, last_batch_size, total_synced)
                 VALUES (1, ?1, ?2, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                    last_sync_at = ?1,
                    last_batch_size = ?2,
                    total_synced = total_synced + ?2",
                rusqlite::params![at_ms, updated as i64],
            )?;
        }
        tx.commit()?;

        if updated < ids.len() {
            debug!(
                "Marked {} of {} samples synced; the rest were already handled",
                updated,
                ids.len()
            );
        }

        Ok(updated)
    }

    /// Delete every sample captured at or before `cutoff`, synced or not.
    ///
    /// Capture times are stored at millisecond resolution (see
    /// [`LocationSample::from_fix`]), so a sample goes exactly when its
    /// stored `captured_at <= cutoff`.
    pub fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM samples WHERE captured_at <= ?1",
            [to_millis(cutoff)],
        )?;
        if deleted > 0 {
            info!("Purged {} samples captured at or before {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Query samples with filters.
    pub fn query_samples(&self, query: &SampleQuery) -> Result<Vec<LocationSample>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let samples = stmt
            .query_map(params_ref.as_slice(), sample_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(samples)
    }

    /// Count all buffered samples.
    pub fn count_samples(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Count samples still waiting for upload.
    pub fn unsynced_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE synced_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

// Sync state operations
impl Store {
    /// Get the upload bookkeeping.
    pub fn sync_state(&self) -> Result<SyncState> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT last_sync_at, last_batch_size, total_synced FROM sync_state WHERE id = 1",
                [],
                |row| {
                    Ok(SyncState {
                        last_sync_at: row
                            .get::<_, Option<i64>>(0)?
                            .map(|ms| from_millis(0, ms))
                            .transpose()?,
                        last_batch_size: row.get::<_, Option<i64>>(1)?.map(|v| v as u64),
                        total_synced: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;

        Ok(state.unwrap_or_default())
    }

    /// When the last batch was confirmed uploaded.
    pub fn last_synced_at(&self) -> Result<Option<OffsetDateTime>> {
        Ok(self.sync_state()?.last_sync_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use proptest::prelude::*;
    use rumpel_types::RawFix;
    use time::Duration;

    fn ts(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn create_test_sample(lat: f64, captured_at: OffsetDateTime) -> LocationSample {
        LocationSample::from_fix(&RawFix::new(lat, -0.1, 10.0, captured_at))
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_samples().unwrap(), 0);
        assert!(store.last_sample().unwrap().is_none());
        assert!(store.last_synced_at().unwrap().is_none());
    }

    #[test]
    fn test_append_and_last_sample() {
        let store = Store::open_in_memory().unwrap();

        let first = store.append(&create_test_sample(51.5, ts(0))).unwrap();
        let second = store.append(&create_test_sample(51.6, ts(10))).unwrap();
        assert!(second > first);

        let last = store.last_sample().unwrap().unwrap();
        assert_eq!(last.sequence_id, second);
        assert_eq!(last.latitude, 51.6);
        assert_eq!(last.captured_at, ts(10));
        assert!(last.synced_at.is_none());
    }

    #[test]
    fn test_append_ignores_caller_sequence_id() {
        let store = Store::open_in_memory().unwrap();
        let mut sample = create_test_sample(1.0, ts(0));
        sample.sequence_id = 999;

        let id = store.append(&sample).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn test_append_rejects_negative_accuracy() {
        let store = Store::open_in_memory().unwrap();
        let mut sample = create_test_sample(1.0, ts(0));
        sample.horizontal_accuracy = -1.0;

        let result = store.append(&sample);
        assert!(matches!(result, Err(Error::InvalidSample(_))));

        sample.horizontal_accuracy = f64::NAN;
        assert!(store.append(&sample).is_err());
        assert_eq!(store.count_samples().unwrap(), 0);
    }

    #[test]
    fn test_millisecond_timestamps_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let captured = ts(0) + Duration::milliseconds(250);
        let id = store.append(&create_test_sample(1.0, captured)).unwrap();

        let stored = store.get_sample(id).unwrap().unwrap();
        assert_eq!(stored.captured_at, captured);
    }

    #[test]
    fn test_unsynced_samples_ordered_and_limited() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store.append(&create_test_sample(i as f64, ts(i))).unwrap();
        }

        let batch = store.unsynced_samples(3).unwrap();
        let ids: Vec<i64> = batch.iter().map(|s| s.sequence_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_mark_synced() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store.append(&create_test_sample(i as f64, ts(i))).unwrap();
        }

        let updated = store.mark_synced(&[1, 2], ts(100)).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(store.unsynced_count().unwrap(), 3);

        let remaining: Vec<i64> = store
            .unsynced_samples(10)
            .unwrap()
            .iter()
            .map(|s| s.sequence_id)
            .collect();
        assert_eq!(remaining, vec![3, 4, 5]);

        let synced = store.get_sample(1).unwrap().unwrap();
        assert_eq!(synced.synced_at, Some(ts(100)));
        assert_eq!(store.last_synced_at().unwrap(), Some(ts(100)));
    }

    #[test]
    fn test_mark_synced_unknown_ids_not_an_error() {
        let store = Store::open_in_memory().unwrap();
        store.append(&create_test_sample(1.0, ts(0))).unwrap();

        let updated = store.mark_synced(&[1, 42, 43], ts(5)).unwrap();
        assert_eq!(updated, 1);

        // Marking again keeps the original sync time
        let updated = store.mark_synced(&[1], ts(50)).unwrap();
        assert_eq!(updated, 0);
        assert_eq!(store.get_sample(1).unwrap().unwrap().synced_at, Some(ts(5)));
    }

    #[test]
    fn test_mark_synced_empty_is_noop() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.mark_synced(&[], ts(0)).unwrap(), 0);
        assert!(store.last_synced_at().unwrap().is_none());
    }

    #[test]
    fn test_sync_state_accumulates() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..4 {
            store.append(&create_test_sample(i as f64, ts(i))).unwrap();
        }

        store.mark_synced(&[1, 2, 3], ts(10)).unwrap();
        store.mark_synced(&[4], ts(20)).unwrap();

        let state = store.sync_state().unwrap();
        assert_eq!(state.last_sync_at, Some(ts(20)));
        assert_eq!(state.last_batch_size, Some(1));
        assert_eq!(state.total_synced, 4);
    }

    #[test]
    fn test_purge_is_unconditional() {
        let store = Store::open_in_memory().unwrap();
        let old_synced = store.append(&create_test_sample(1.0, ts(0))).unwrap();
        store.append(&create_test_sample(2.0, ts(10))).unwrap(); // old, never synced
        store.append(&create_test_sample(3.0, ts(20))).unwrap(); // exactly at cutoff
        let fresh = store.append(&create_test_sample(4.0, ts(30))).unwrap();
        store.mark_synced(&[old_synced], ts(1)).unwrap();

        let deleted = store.purge_older_than(ts(20)).unwrap();
        assert_eq!(deleted, 3);

        let remaining = store.query_samples(&SampleQuery::new()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].sequence_id, fresh);
        assert!(remaining.iter().all(|s| s.captured_at > ts(20)));

        // The sync bookkeeping survives the purge
        assert_eq!(store.last_synced_at().unwrap(), Some(ts(1)));
    }

    #[test]
    fn test_sequence_ids_not_reused_after_purge() {
        let store = Store::open_in_memory().unwrap();
        store.append(&create_test_sample(1.0, ts(0))).unwrap();
        let second = store.append(&create_test_sample(2.0, ts(1))).unwrap();
        store.purge_older_than(ts(5)).unwrap();

        let third = store.append(&create_test_sample(3.0, ts(10))).unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_query_samples_filters() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..6 {
            store.append(&create_test_sample(i as f64, ts(i * 10))).unwrap();
        }
        store.mark_synced(&[1, 2], ts(100)).unwrap();

        let recent = store
            .query_samples(&SampleQuery::new().since(ts(20)).until(ts(40)))
            .unwrap();
        let ids: Vec<i64> = recent.iter().map(|s| s.sequence_id).collect();
        assert_eq!(ids, vec![5, 4, 3]);

        let unsynced = store
            .query_samples(&SampleQuery::new().unsynced_only().oldest_first().limit(2))
            .unwrap();
        let ids: Vec<i64> = unsynced.iter().map(|s| s.sequence_id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("locations.db");

        {
            let store = Store::open(&path).unwrap();
            store.append(&create_test_sample(1.0, ts(0))).unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_read_only_store_refuses_writes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("locations.db");
        let writer = Store::open(&path).unwrap();
        writer.append(&create_test_sample(1.0, ts(0))).unwrap();

        let reader = Store::open_read_only(&path).unwrap();
        let result = reader.append(&create_test_sample(2.0, ts(1)));
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(writer.count_samples().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_appends_are_serialized() {
        let store = Arc::new(Store::open_in_memory().unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            store.append(&create_test_sample(t as f64, ts(i))).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_purge_cutoff_matches_capture_time() {
        let cases = [
            (1_714_564_800_000_700_000, -1, 0),
            (1_714_564_800_000_700_000, 0, 1),
            (1_714_564_800_000_700_000, 1, 1),
            (-1_500_000_001, -1, 0),
            (-1_500_000_001, 0, 1),
        ];

        for (fix_nanos, offset_micros, expected) in cases {
            let fix_at = OffsetDateTime::from_unix_timestamp_nanos(fix_nanos).unwrap();
            let sample = LocationSample::from_fix(&RawFix::new(51.5, -0.1, 5.0, fix_at));
            let store = Store::open_in_memory().unwrap();
            store.append(&sample).unwrap();

            let cutoff = sample.captured_at + Duration::microseconds(offset_micros);
            assert_eq!(
                store.purge_older_than(cutoff).unwrap(),
                expected,
                "fix at {fix_nanos}ns, cutoff {offset_micros}us from capture"
            );
        }
    }

    proptest! {
        #[test]
        fn append_ids_strictly_increase_without_gaps(
            lats in proptest::collection::vec(-89.0f64..89.0, 1..40)
        ) {
            let store = Store::open_in_memory().unwrap();
            let ids: Vec<i64> = lats
                .iter()
                .enumerate()
                .map(|(i, lat)| store.append(&create_test_sample(*lat, ts(i as i64))).unwrap())
                .collect();

            for pair in ids.windows(2) {
                prop_assert_eq!(pair[1], pair[0] + 1);
            }
            prop_assert_eq!(ids[0], 1);
        }
    }
}
