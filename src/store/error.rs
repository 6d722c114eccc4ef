use thiserror::Error;

/// Failures of the aggregation store. Probe failures are never errors;
/// they are carried as `ProbeOutcome::Failure` instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot connect to store at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("failed to provision store `{table}`: {reason}")]
    Provision { table: String, reason: String },

    #[error(
        "store `{table}` was provisioned with a {existing}s bucket width (schema v{existing_version}), \
         but {configured}s is configured"
    )]
    SchemaConflict {
        table: String,
        existing: u32,
        existing_version: u32,
        configured: u32,
    },

    #[error("failed to ingest {updates} update(s) into bucket {bucket}: {reason}")]
    Ingest {
        bucket: i64,
        updates: usize,
        reason: String,
    },

    #[error("failed to query {url}: {reason}")]
    Query { url: String, reason: String },

    #[error("failed to decode record `{key}`: {reason}")]
    Decode { key: String, reason: String },

    #[error("counter overflow for {url} in bucket {bucket}")]
    Overflow { url: String, bucket: i64 },

    #[error("status {status} from {url} has no status class")]
    InvalidStatus { url: String, status: u16 },

    #[error("response time for {url} does not fit the store")]
    ResponseTimeOutOfRange { url: String },
}
