use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use super::error::StoreError;

// ─── Bucketing ───────────────────────────────────────────────────

/// Width of one aggregation bucket, in whole seconds. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWidth(NonZeroU32);

impl BucketWidth {
    pub const DEFAULT_SECS: u32 = 300;

    pub fn from_secs(secs: u32) -> Option<Self> {
        NonZeroU32::new(secs).map(Self)
    }

    pub fn secs(self) -> u32 {
        self.0.get()
    }

    /// Start of the bucket containing `timestamp` (unix seconds).
    ///
    /// Uses the euclidean remainder so pre-epoch timestamps still align
    /// downwards, which keeps `align(align(t)) == align(t)` for every `t`.
    pub fn align(self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(i64::from(self.secs()))
    }
}

impl Default for BucketWidth {
    fn default() -> Self {
        const DEFAULT: NonZeroU32 = match NonZeroU32::new(BucketWidth::DEFAULT_SECS) {
            Some(width) => width,
            None => panic!("default bucket width must be non-zero"),
        };
        Self(DEFAULT)
    }
}

// ─── Status classes ──────────────────────────────────────────────

/// Leading digit of an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub const ALL: [StatusClass; 5] = [
        Self::Informational,
        Self::Success,
        Self::Redirection,
        Self::ClientError,
        Self::ServerError,
    ];

    /// `None` for anything outside 100..=599.
    pub fn from_status(status: u16) -> Option<Self> {
        match status / 100 {
            1 => Some(Self::Informational),
            2 => Some(Self::Success),
            3 => Some(Self::Redirection),
            4 => Some(Self::ClientError),
            5 => Some(Self::ServerError),
            _ => None,
        }
    }

    /// Persisted counter name, e.g. `count_2xx`.
    pub fn field(self) -> &'static str {
        match self {
            Self::Informational => "count_1xx",
            Self::Success => "count_2xx",
            Self::Redirection => "count_3xx",
            Self::ClientError => "count_4xx",
            Self::ServerError => "count_5xx",
        }
    }

    pub fn label(self) -> &'static str {
        &self.field()["count_".len()..]
    }
}

// ─── Records ─────────────────────────────────────────────────────

/// Aggregate for one (url, bucket) pair.
///
/// Field names are the persisted schema and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub url: String,
    /// Bucket start, unix seconds.
    pub timestamp: i64,
    pub count: i64,
    pub count_1xx: i64,
    pub count_2xx: i64,
    pub count_3xx: i64,
    pub count_4xx: i64,
    pub count_5xx: i64,
    /// Sum of all response times in microseconds.
    pub response_time: i64,
}

impl MetricRecord {
    pub fn empty(url: impl Into<String>, timestamp: i64) -> Self {
        Self {
            url: url.into(),
            timestamp,
            count: 0,
            count_1xx: 0,
            count_2xx: 0,
            count_3xx: 0,
            count_4xx: 0,
            count_5xx: 0,
            response_time: 0,
        }
    }

    pub fn class_count(&self, class: StatusClass) -> i64 {
        match class {
            StatusClass::Informational => self.count_1xx,
            StatusClass::Success => self.count_2xx,
            StatusClass::Redirection => self.count_3xx,
            StatusClass::ClientError => self.count_4xx,
            StatusClass::ServerError => self.count_5xx,
        }
    }

    fn class_count_mut(&mut self, class: StatusClass) -> &mut i64 {
        match class {
            StatusClass::Informational => &mut self.count_1xx,
            StatusClass::Success => &mut self.count_2xx,
            StatusClass::Redirection => &mut self.count_3xx,
            StatusClass::ClientError => &mut self.count_4xx,
            StatusClass::ServerError => &mut self.count_5xx,
        }
    }

    /// `response_time / count` in milliseconds; `None` for an empty record.
    pub fn average_response_ms(&self) -> Option<f64> {
        if self.count <= 0 {
            return None;
        }
        Some(self.response_time as f64 / self.count as f64 / 1000.0)
    }

    /// Adds one update with overflow checking; the record is left
    /// untouched on overflow.
    pub(crate) fn accumulate(&mut self, update: &MetricUpdate) -> Result<(), StoreError> {
        let overflow = || StoreError::Overflow {
            url: self.url.clone(),
            bucket: self.timestamp,
        };

        let response_time = self
            .response_time
            .checked_add(update.response_time_us)
            .ok_or_else(overflow)?;
        let count = self.count.checked_add(1).ok_or_else(overflow)?;
        let class = self
            .class_count(update.class)
            .checked_add(1)
            .ok_or_else(overflow)?;

        self.response_time = response_time;
        self.count = count;
        *self.class_count_mut(update.class) = class;
        Ok(())
    }
}

/// One additive increment against a (url, bucket) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricUpdate {
    pub url: String,
    pub class: StatusClass,
    pub response_time_us: i64,
}

/// Descriptor written once when the store is provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub version: u32,
    pub bucket_width: u32,
}

impl SchemaDescriptor {
    pub const VERSION: u32 = 1;

    pub fn current(width: BucketWidth) -> Self {
        Self {
            version: Self::VERSION,
            bucket_width: width.secs(),
        }
    }
}
