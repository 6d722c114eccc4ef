use redis::aio::ConnectionManager;

use crate::store::StoreError;

/// Creates a single `ConnectionManager` that auto-reconnects on failure.
///
/// `ConnectionManager` is cheaply cloneable; every clone shares the same
/// underlying multiplexed TCP connection, so the monitor and every web
/// handler can hold their own handle.
pub async fn connect(url: &str) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(url).map_err(|e| StoreError::Connection {
        endpoint: url.to_string(),
        reason: format!("invalid Redis URL: {e}"),
    })?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| StoreError::Connection {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })
}
