//! Incremental range cache for telemetry queries.
//!
//! Remembers which time spans were already fetched (covered intervals) and
//! the deduplicated records they produced, both persisted through a
//! [`StorageBackend`]. A query fetches only the gaps of its window, one at a
//! time, then writes the merged store back.
//!
//! Concurrency: [`RangeCache::query`] takes `&mut self`, so queries through
//! one cache value never interleave. Two cache values pointed at the same
//! storage location are not coordinated: both can read the same snapshot and
//! the later write discards the earlier one's merge (lost update). Give each
//! credential set its own key prefix, or share a single cache value.

pub mod interval;
pub mod storage;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::decode::{RecordKey, TelemetryRecord};
use crate::error::{Error, StorageError};
use crate::session::Credentials;

pub use interval::{merge_intervals, missing_ranges, Interval, MERGE_TOLERANCE_MS};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};

pub const DEFAULT_KEY_PREFIX: &str = "pumpsync.cache";

/// Where gap fetches come from. [`crate::TelemetryClient`] is the real one.
#[async_trait::async_trait]
pub trait TelemetrySource: Send {
    /// Called once per query that has at least one gap, before any fetch.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), Error>;

    async fn fetch_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, Error>;
}

/// In-memory view of the persisted cache.
#[derive(Debug, Default, Clone)]
pub struct CacheStore {
    pub intervals: Vec<Interval>,
    records: BTreeMap<RecordKey, TelemetryRecord>,
}

impl CacheStore {
    /// Insert records, keeping the first copy of each key. Returns how many
    /// were new.
    pub fn merge_records(&mut self, records: Vec<TelemetryRecord>) -> usize {
        let mut added = 0;
        for record in records {
            self.records.entry(record.key()).or_insert_with(|| {
                added += 1;
                record
            });
        }
        added
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Records inside the closed `[start, end]` window, oldest first.
    pub fn records_in(&self, window: Interval) -> Vec<TelemetryRecord> {
        let mut out: Vec<TelemetryRecord> = self
            .records
            .values()
            .filter(|r| {
                let ms = r.timestamp.timestamp_millis();
                window.start <= ms && ms <= window.end
            })
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.timestamp, r.record_id, r.sequence_number));
        out
    }
}

#[derive(Debug, Clone)]
struct CacheKeys {
    intervals: String,
    records: String,
}

impl CacheKeys {
    fn with_prefix(prefix: &str) -> Self {
        Self {
            intervals: format!("{}.intervals", prefix),
            records: format!("{}.records", prefix),
        }
    }
}

pub struct RangeCache<S, B> {
    source: S,
    storage: B,
    keys: CacheKeys,
    merge_tolerance_ms: i64,
}

impl<S: TelemetrySource, B: StorageBackend> RangeCache<S, B> {
    pub fn new(source: S, storage: B) -> Self {
        Self {
            source,
            storage,
            keys: CacheKeys::with_prefix(DEFAULT_KEY_PREFIX),
            merge_tolerance_ms: MERGE_TOLERANCE_MS,
        }
    }

    /// Namespace the two persisted keys, e.g. per account.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.keys = CacheKeys::with_prefix(prefix);
        self
    }

    pub fn with_merge_tolerance(mut self, tolerance: Duration) -> Self {
        self.merge_tolerance_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn storage(&self) -> &B {
        &self.storage
    }

    /// Return every record in `[start, end]`, fetching only uncovered spans.
    ///
    /// Any fetch failure aborts the whole query; nothing from that query is
    /// persisted or returned. Persist failures are logged and the freshly
    /// merged result is still returned.
    #[tracing::instrument(
        name = "cache_query",
        skip(self, credentials),
        fields(
            gaps = tracing::field::Empty,
            fetched = tracing::field::Empty,
        )
    )]
    pub async fn query(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        credentials: &Credentials,
    ) -> Result<Vec<TelemetryRecord>, Error> {
        if start > end {
            return Err(Error::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }

        let requested = Interval::from_instants(start, end);
        let mut store = self.load().await;
        let gaps = missing_ranges(&store.intervals, requested);
        tracing::Span::current().record("gaps", gaps.len());

        if gaps.is_empty() {
            debug!("query fully covered by cache");
            return Ok(store.records_in(requested));
        }

        self.source.authenticate(credentials).await?;

        let mut fetched = 0;
        let mut added = 0;
        for gap in &gaps {
            let (Some(gap_start), Some(gap_end)) = (gap.start_instant(), gap.end_instant()) else {
                continue;
            };
            debug!(start = %gap_start, end = %gap_end, "fetching gap");
            let records = self.source.fetch_range(gap_start, gap_end).await?;
            fetched += records.len();
            added += store.merge_records(records);
            store.intervals.push(*gap);
        }
        store.intervals = merge_intervals(
            std::mem::take(&mut store.intervals),
            self.merge_tolerance_ms,
        );
        tracing::Span::current().record("fetched", fetched);

        info!(
            gaps = gaps.len(),
            fetched,
            added,
            cached = store.record_count(),
            "cache updated"
        );

        if let Err(e) = self.persist(&store).await {
            warn!(error = %e, "failed to persist telemetry cache");
        }

        Ok(store.records_in(requested))
    }

    /// Delete both persisted entries.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(&self.keys.intervals).await?;
        self.storage.remove(&self.keys.records).await?;
        info!("telemetry cache cleared");
        Ok(())
    }

    /// Persisted covered intervals.
    pub async fn coverage(&self) -> Vec<Interval> {
        self.load().await.intervals
    }

    /// Read the persisted store. Missing, unreadable or corrupt entries give
    /// an empty store so the next query refetches.
    async fn load(&self) -> CacheStore {
        match self.try_load().await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "discarding unreadable telemetry cache");
                CacheStore::default()
            }
        }
    }

    async fn try_load(&self) -> Result<CacheStore, StorageError> {
        let intervals_json = self.storage.get(&self.keys.intervals).await?;
        let records_json = self.storage.get(&self.keys.records).await?;

        let (Some(intervals_json), Some(records_json)) = (intervals_json, records_json) else {
            return Ok(CacheStore::default());
        };

        let intervals: Vec<Interval> =
            serde_json::from_str(&intervals_json).map_err(|source| StorageError::Serialize {
                key: self.keys.intervals.clone(),
                source,
            })?;
        let records: Vec<TelemetryRecord> =
            serde_json::from_str(&records_json).map_err(|source| StorageError::Serialize {
                key: self.keys.records.clone(),
                source,
            })?;

        let mut store = CacheStore {
            intervals: merge_intervals(intervals, self.merge_tolerance_ms),
            records: BTreeMap::new(),
        };
        store.merge_records(records);
        Ok(store)
    }

    async fn persist(&self, store: &CacheStore) -> Result<(), StorageError> {
        let intervals =
            serde_json::to_string(&store.intervals).map_err(|source| StorageError::Serialize {
                key: self.keys.intervals.clone(),
                source,
            })?;
        let records: Vec<&TelemetryRecord> = store.records.values().collect();
        let records =
            serde_json::to_string(&records).map_err(|source| StorageError::Serialize {
                key: self.keys.records.clone(),
                source,
            })?;

        self.storage.set(&self.keys.records, records).await?;
        self.storage.set(&self.keys.intervals, intervals).await?;
        Ok(())
    }
}
