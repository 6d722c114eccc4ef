use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MetricBackend, MetricRecord, MetricUpdate, SchemaDescriptor, StoreError};

/// Process-local backend for single-process runs and tests.
///
/// Keyed by `(url, bucket)` so a range over one URL's partition is a
/// contiguous `BTreeMap` range.
pub struct MemoryBackend {
    name: String,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    schema: Option<SchemaDescriptor>,
    records: BTreeMap<(String, i64), MetricRecord>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }
}

#[async_trait]
impl MetricBackend for MemoryBackend {
    fn table(&self) -> &str {
        &self.name
    }

    async fn provision(
        &self,
        schema: &SchemaDescriptor,
    ) -> Result<Option<SchemaDescriptor>, StoreError> {
        let mut inner = self.inner.lock();
        match inner.schema {
            Some(existing) => Ok(Some(existing)),
            None => {
                inner.schema = Some(*schema);
                Ok(None)
            }
        }
    }

    async fn apply(&self, bucket: i64, updates: &[MetricUpdate]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        // Stage every touched record; nothing is published until all
        // updates have been applied without overflow.
        let mut staged: BTreeMap<(String, i64), MetricRecord> = BTreeMap::new();
        for update in updates {
            let record = match staged.entry((update.url.clone(), bucket)) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let current = inner
                        .records
                        .get(e.key())
                        .cloned()
                        .unwrap_or_else(|| MetricRecord::empty(update.url.clone(), bucket));
                    e.insert(current)
                }
            };
            record.accumulate(update)?;
        }

        inner.records.extend(staged);
        Ok(())
    }

    async fn scan(
        &self,
        url: &str,
        from: i64,
        to: i64,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, StoreError> {
        let lower = match after {
            Some(ts) => match ts.checked_add(1) {
                Some(next) => next.max(from),
                None => return Ok(Vec::new()),
            },
            None => from,
        };
        if lower > to {
            return Ok(Vec::new());
        }

        let inner = self.inner.lock();
        Ok(inner
            .records
            .range((url.to_string(), lower)..=(url.to_string(), to))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
