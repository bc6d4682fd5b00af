//! Concurrent retrieval of source feeds.
//
// Every source is validated, then fetched in its own future with an
// independent timeout and retry budget. All futures are joined; one source
// failing never cancels or delays another.

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::ics::RawDocument;

pub mod http;
pub mod url_guard;

pub use http::HttpFetcher;
pub use url_guard::{ensure_public_host, is_blocked_ip, public_addrs, validate_url};

/// Default ceiling on a response body.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Status codes worth another attempt.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Failure fetching one source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Network failure: {message}")]
    Network { message: String, transient: bool },
    #[error("HTTP status {status}")]
    Http { status: u16 },
    #[error("Response exceeds {limit} bytes")]
    Oversize { limit: usize },
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { transient, .. } => *transient,
            FetchError::Http { status } => TRANSIENT_STATUSES.contains(status),
            FetchError::InvalidUrl { .. } | FetchError::Oversize { .. } => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            FetchError::Network { .. } => ErrorKind::NetworkFailure,
            FetchError::Http { .. } => ErrorKind::HttpFailure,
            FetchError::Oversize { .. } => ErrorKind::OversizeResponse,
        }
    }
}

/// Error category reported per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidUrl,
    NetworkFailure,
    HttpFailure,
    OversizeResponse,
}

/// Result for one source in one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub origin: String,
    pub success: bool,
    pub event_count: usize,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub attempts: u32,
}

impl SyncOutcome {
    fn succeeded(origin: &str, attempts: u32) -> Self {
        Self {
            origin: origin.to_string(),
            success: true,
            event_count: 0,
            error_kind: None,
            error_message: None,
            attempts,
        }
    }

    fn failed(origin: &str, err: &FetchError, attempts: u32) -> Self {
        Self {
            origin: origin.to_string(),
            success: false,
            event_count: 0,
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
            attempts,
        }
    }
}

/// A source to fetch: origin tag and feed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub origin: String,
    pub url: String,
}

impl SourceSpec {
    pub fn new(origin: impl Into<String>, url: impl Into<String>) -> Self {
        Self { origin: origin.into(), url: url.into() }
    }
}

/// Outcome plus the body when the fetch succeeded.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub outcome: SyncOutcome,
    pub document: Option<RawDocument>,
}

/// Timeout, retry and size limits applied to every source.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Total attempts per source, first one included. Zero is treated as one.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub base_delay: Duration,
    pub max_response_bytes: usize,
    /// Resolve domain hosts and reject ones pointing at loopback/unspecified addresses.
    pub resolve_hosts: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            resolve_hosts: true,
        }
    }
}

impl FetchPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// The consumed network capability: fetch one URL's body.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration, max_bytes: usize) -> Result<Vec<u8>, FetchError>;
}

/// Validates and fetches every source concurrently.
pub struct FetchOrchestrator<F: Fetcher> {
    fetcher: F,
    policy: FetchPolicy,
}

impl<F: Fetcher> FetchOrchestrator<F> {
    pub fn new(fetcher: F, policy: FetchPolicy) -> Self {
        Self { fetcher, policy }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch all sources; returns exactly one report per source, in input order.
    pub async fn fetch_all(&self, sources: &[SourceSpec]) -> Vec<FetchReport> {
        info!("Fetching {} source(s)", sources.len());
        let reports = join_all(sources.iter().map(|source| self.fetch_source(source))).await;

        let succeeded = reports.iter().filter(|r| r.outcome.success).count();
        info!("Fetched {}/{} source(s) successfully", succeeded, sources.len());
        reports
    }

    async fn fetch_source(&self, source: &SourceSpec) -> FetchReport {
        let url = match self.check_url(&source.url).await {
            Ok(url) => url,
            Err(err) => {
                warn!("Rejected source '{}': {}", source.origin, err);
                return FetchReport { outcome: SyncOutcome::failed(&source.origin, &err, 0), document: None };
            }
        };

        let (result, attempts) = self.fetch_with_retry(&source.origin, &url).await;
        match result {
            Ok(bytes) => {
                debug!("Source '{}' returned {} bytes", source.origin, bytes.len());
                FetchReport {
                    outcome: SyncOutcome::succeeded(&source.origin, attempts),
                    document: Some(RawDocument::new(source.origin.clone(), bytes)),
                }
            }
            Err(err) => {
                error!(
                    "Source '{}' failed after {} attempt(s): {}",
                    source.origin, attempts, err
                );
                FetchReport { outcome: SyncOutcome::failed(&source.origin, &err, attempts), document: None }
            }
        }
    }

    async fn check_url(&self, raw: &str) -> Result<Url, FetchError> {
        let url = validate_url(raw)?;
        if self.policy.resolve_hosts {
            ensure_public_host(&url).await?;
        }
        Ok(url)
    }

    async fn fetch_with_retry(&self, origin: &str, url: &Url) -> (Result<Vec<u8>, FetchError>, u32) {
        let max_attempts = self.policy.max_attempts();
        let limit = self.policy.max_response_bytes;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.policy.timeout,
                self.fetcher.fetch(url, self.policy.timeout, limit),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Network {
                    message: format!("timed out after {:?}", self.policy.timeout),
                    transient: true,
                }),
            };

            let result = result.and_then(|bytes| {
                if bytes.len() > limit {
                    Err(FetchError::Oversize { limit })
                } else {
                    Ok(bytes)
                }
            });

            match result {
                Ok(bytes) => return (Ok(bytes), attempt),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Fetch of '{}' failed (attempt {}/{}): {}; retrying in {:?}",
                        origin, attempt, max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }
}
