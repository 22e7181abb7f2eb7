//! Query builder for buffered samples.
//!
//! [`SampleQuery`] follows the builder pattern for filtering and paginating
//! stored samples, e.g. for the host's history view.
//!
//! # Example
//!
//! ```
//! use rumpel_store::{SampleQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = SampleQuery::new()
//!     .since(yesterday)
//!     .unsynced_only()
//!     .limit(50);
//!
//! let samples = store.query_samples(&query)?;
//! assert!(samples.is_empty());
//! # Ok::<(), rumpel_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::store::to_millis;

/// Fluent query builder for stored samples.
///
/// By default, results are ordered by `sequence_id` descending (newest first).
#[derive(Debug, Default, Clone)]
pub struct SampleQuery {
    /// Only samples captured at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Only samples captured at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Only samples not yet uploaded.
    pub unsynced_only: bool,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by sequence id descending.
    pub newest_first: bool,
}

impl SampleQuery {
    /// Create a new query: all samples, newest first, no limit.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter to samples captured at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to samples captured at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Only include samples that have not been uploaded.
    pub fn unsynced_only(mut self) -> Self {
        self.unsynced_only = true;
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results oldest first (insertion order).
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(Box::new(to_millis(until)));
        }

        if self.unsynced_only {
            conditions.push("synced_at IS NULL");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT sequence_id, latitude, longitude, horizontal_accuracy, captured_at, synced_at \
             FROM samples {} ORDER BY sequence_id {}",
            where_clause, order
        );

        // SQLite only accepts OFFSET after a LIMIT clause
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
