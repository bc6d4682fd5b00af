//! reqwest-backed [`Fetcher`].

use async_trait::async_trait;
use log::debug;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::ACCEPT;
use reqwest::redirect::{Attempt, Policy};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::url_guard::{public_addrs, validate_url};
use super::{FetchError, Fetcher};

pub const DEFAULT_USER_AGENT: &str = concat!("icsfusion/", env!("CARGO_PKG_VERSION"));

const MAX_REDIRECTS: usize = 5;

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::custom(guard_redirect))
            .dns_resolver(Arc::new(PublicResolver))
            .build()
            .map_err(|e| FetchError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                transient: false,
            })?;
        Ok(Self { client })
    }
}

/// DNS resolver that never hands loopback or unspecified addresses to the
/// connector. Applies to the first request, every redirect hop and any
/// re-resolution between validation and connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            // Port is replaced by the connector
            let resolved = tokio::net::lookup_host((host.as_str(), 0)).await?;
            let allowed = public_addrs(&host, resolved)?;
            debug!("Resolved {} to {} public address(es)", host, allowed.len());
            let addrs: Addrs = Box::new(allowed.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

// Redirects get the same URL checks as configured sources.
fn guard_redirect(attempt: Attempt) -> reqwest::redirect::Action {
    if attempt.previous().len() >= MAX_REDIRECTS {
        return attempt.stop();
    }
    match validate_url(attempt.url().as_str()) {
        Ok(_) => attempt.follow(),
        Err(err) => attempt.error(err),
    }
}

fn network_error(err: reqwest::Error) -> FetchError {
    let transient = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
    FetchError::Network { message: err.to_string(), transient }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration, max_bytes: usize) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", url);
        let mut response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/calendar, application/ics, */*")
            .timeout(timeout)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http { status: status.as_u16() });
        }

        if let Some(length) = response.content_length() {
            if length > max_bytes as u64 {
                return Err(FetchError::Oversize { limit: max_bytes });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(network_error)? {
            if body.len() + chunk.len() > max_bytes {
                return Err(FetchError::Oversize { limit: max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_resolver_refuses_loopback_names() {
        let result = PublicResolver.resolve(Name::from_str("localhost").unwrap()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_client_builds_with_resolver() {
        assert!(HttpFetcher::new(DEFAULT_USER_AGENT).is_ok());
    }
}
