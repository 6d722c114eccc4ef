use std::error::Error as _;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

use crate::store::StatusClass;

/// Applied uniformly to every probe request.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Outcomes ────────────────────────────────────────────────────

/// Target answered with an HTTP status (any class, 4xx/5xx included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSuccess {
    pub url: String,
    pub response_time: Duration,
    pub status: u16,
}

/// Transport-level failure: DNS, connect, timeout, malformed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub url: String,
    pub response_time: Duration,
    pub error: String,
}

/// Result of one timed GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success(ProbeSuccess),
    Failure(ProbeFailure),
}

#[cfg(test)]
impl ProbeOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Success(s) => &s.url,
            Self::Failure(f) => &f.url,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success(s) => Some(s.status),
            Self::Failure(_) => None,
        }
    }
}

// ─── Prober ──────────────────────────────────────────────────────

/// Fans out one GET per URL over a shared client.
///
/// `Client` is cheaply cloneable; every probe task shares its connection
/// pool and timeout.
#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
}

impl Prober {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Starts every probe immediately and returns a stream that yields
    /// outcomes in completion order. The stream ends once every launched
    /// probe has reported, so it yields exactly `urls.len()` items.
    pub fn visit(&self, urls: &[String]) -> ProbeStream {
        let (tx, rx) = mpsc::unbounded_channel();

        for url in urls {
            let client = self.client.clone();
            let tx = tx.clone();
            let url = url.clone();

            tokio::spawn(async move {
                let outcome = probe(&client, url).await;
                // Receiver gone means the caller stopped listening.
                let _ = tx.send(outcome);
            });
        }

        ProbeStream {
            inner: UnboundedReceiverStream::new(rx),
            remaining: urls.len(),
        }
    }
}

/// Outcomes of one `visit`, as they complete.
pub struct ProbeStream {
    inner: UnboundedReceiverStream<ProbeOutcome>,
    remaining: usize,
}

impl Stream for ProbeStream {
    type Item = ProbeOutcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(Some(_)) = &polled {
            self.remaining = self.remaining.saturating_sub(1);
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

// ─── Single probe ────────────────────────────────────────────────

async fn probe(client: &Client, url: String) -> ProbeOutcome {
    let t0 = Instant::now();
    let result = client.get(&url).send().await;
    let response_time = t0.elapsed();

    match result {
        Ok(response) => {
            let status = response.status().as_u16();
            if StatusClass::from_status(status).is_none() {
                tracing::warn!(%url, status, "non-standard status treated as probe failure");
                return ProbeOutcome::Failure(ProbeFailure {
                    url,
                    response_time,
                    error: format!("non-standard HTTP status {status}"),
                });
            }
            tracing::debug!(%url, status, elapsed_us = response_time.as_micros() as u64, "probe finished");
            ProbeOutcome::Success(ProbeSuccess {
                url,
                response_time,
                status,
            })
        }
        Err(err) => {
            let error = describe(&err);
            tracing::debug!(%url, %error, elapsed_us = response_time.as_micros() as u64, "probe failed");
            ProbeOutcome::Failure(ProbeFailure {
                url,
                response_time,
                error,
            })
        }
    }
}

/// reqwest's top-level message is terse; append the source chain.
fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return format!("request timed out: {err}");
    }
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
