pub mod error;
pub mod memory;
pub mod record;
pub mod redis_backend;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio_stream::Stream;

use crate::prober::ProbeSuccess;

pub use error::StoreError;
pub use memory::MemoryBackend;
pub use record::{BucketWidth, MetricRecord, MetricUpdate, SchemaDescriptor, StatusClass};
pub use redis_backend::RedisBackend;

/// Records per backend round-trip while scanning a range.
const SCAN_PAGE_SIZE: usize = 100;

/// Lazily produced query results. The first error ends the stream.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<MetricRecord, StoreError>> + Send>>;

// ─── Backend seam ────────────────────────────────────────────────

/// Durable storage primitive behind `MetricStore`.
///
/// Records are partitioned by URL and ordered by bucket timestamp within
/// a partition. Implementations own atomicity: `apply` must commit every
/// update or none of them.
#[async_trait]
pub trait MetricBackend: Send + Sync {
    /// Human-readable location, used in error messages.
    fn table(&self) -> &str;

    /// Writes `schema` unless a descriptor already exists, in which case
    /// the existing descriptor is returned untouched.
    async fn provision(
        &self,
        schema: &SchemaDescriptor,
    ) -> Result<Option<SchemaDescriptor>, StoreError>;

    /// Applies every update to `(update.url, bucket)` as one atomic unit.
    async fn apply(&self, bucket: i64, updates: &[MetricUpdate]) -> Result<(), StoreError>;

    /// Up to `limit` records for `url` with `from <= timestamp <= to`,
    /// strictly after `after` when given, ascending by timestamp.
    async fn scan(
        &self,
        url: &str,
        from: i64,
        to: i64,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, StoreError>;
}

// ─── Queries ─────────────────────────────────────────────────────

/// Inclusive time range for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub url: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Whether `init` created the schema or found it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

// ─── Store ───────────────────────────────────────────────────────

/// Time-bucketed aggregation store.
///
/// Cheap to clone; clones share the backend handle.
#[derive(Clone)]
pub struct MetricStore {
    backend: Arc<dyn MetricBackend>,
    width: BucketWidth,
}

impl MetricStore {
    pub fn new(backend: Arc<dyn MetricBackend>, width: BucketWidth) -> Self {
        Self { backend, width }
    }

    pub fn bucket_width(&self) -> BucketWidth {
        self.width
    }

    /// Bucket a cycle starting at `timestamp` lands in.
    pub fn bucket(&self, timestamp: DateTime<Utc>) -> i64 {
        self.width.align(timestamp.timestamp())
    }

    /// Idempotent provisioning. An existing schema with the same bucket
    /// width is success; a different width would misalign every bucket
    /// and is refused.
    pub async fn init(&self) -> Result<Provisioned, StoreError> {
        let wanted = SchemaDescriptor::current(self.width);
        match self.backend.provision(&wanted).await? {
            None => {
                tracing::info!(table = self.backend.table(), bucket_width = wanted.bucket_width, "store provisioned");
                Ok(Provisioned::Created)
            }
            Some(existing) if existing == wanted => {
                tracing::debug!(table = self.backend.table(), "store already provisioned");
                Ok(Provisioned::AlreadyExists)
            }
            Some(existing) => Err(StoreError::SchemaConflict {
                table: self.backend.table().to_string(),
                existing: existing.bucket_width,
                existing_version: existing.version,
                configured: wanted.bucket_width,
            }),
        }
    }

    /// Adds every outcome into the bucket of `timestamp`, all or nothing.
    /// Returns the bucket written to.
    pub async fn ingest(
        &self,
        timestamp: DateTime<Utc>,
        outcomes: &[ProbeSuccess],
    ) -> Result<i64, StoreError> {
        let bucket = self.bucket(timestamp);

        let updates = outcomes
            .iter()
            .map(update_for)
            .collect::<Result<Vec<_>, _>>()?;

        if updates.is_empty() {
            return Ok(bucket);
        }

        self.backend.apply(bucket, &updates).await?;
        tracing::debug!(bucket, updates = updates.len(), "ingest committed");
        Ok(bucket)
    }

    /// Streams records for `query.url` with bucket timestamps in
    /// `[from, to]`, page by page.
    pub fn query(&self, query: MetricQuery) -> RecordStream {
        let backend = Arc::clone(&self.backend);

        Box::pin(async_stream::stream! {
            let from = query.from.timestamp();
            let to = query.to.timestamp();
            let mut after = None;

            loop {
                let page = match backend
                    .scan(&query.url, from, to, after, SCAN_PAGE_SIZE)
                    .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                let exhausted = page.len() < SCAN_PAGE_SIZE;
                after = page.last().map(|r| r.timestamp);

                for record in page {
                    yield Ok(record);
                }
                if exhausted {
                    break;
                }
            }
        })
    }

    /// Drains `query` and sorts ascending by bucket timestamp.
    pub async fn query_all(&self, query: MetricQuery) -> Result<Vec<MetricRecord>, StoreError> {
        let mut records: Vec<MetricRecord> = self.query(query).try_collect().await?;
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

fn update_for(outcome: &ProbeSuccess) -> Result<MetricUpdate, StoreError> {
    let class = StatusClass::from_status(outcome.status).ok_or_else(|| StoreError::InvalidStatus {
        url: outcome.url.clone(),
        status: outcome.status,
    })?;
    let response_time_us = i64::try_from(outcome.response_time.as_micros()).map_err(|_| {
        StoreError::ResponseTimeOutOfRange {
            url: outcome.url.clone(),
        }
    })?;

    Ok(MetricUpdate {
        url: outcome.url.clone(),
        class,
        response_time_us,
    })
}
