//! Snapshot index client.
//!
//! Fetches the `src/contrib/PACKAGES` file of a pinned snapshot and parses it
//! into an immutable [`PackageIndex`]. The index is fetched exactly once per
//! run and passed by value through the rest of the pipeline, so the
//! dependency graph stays consistent even if the upstream snapshot rotates
//! while a run is in flight.

use std::time::Duration;

use tracing::{info, warn};

use cranforge_schema::{PackageIndex, index::ParseError};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for transient index-fetch failures
const MAX_RETRIES: u32 = 3;

/// Base retry delay in milliseconds, scaled by attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Errors from fetching or parsing the snapshot index. `Network` covers
/// transient transport failures (retried internally); `Status` and `Parse`
/// are fatal for the whole run -- a partial index is never usable.
#[derive(thiserror::Error, Debug)]
pub enum IndexFetchError {
    /// The index host was unreachable after exhausting retries.
    #[error("failed to fetch snapshot index after {attempts} attempts: {source}")]
    Network {
        /// Number of attempts made.
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// The HTTP status received.
        status: reqwest::StatusCode,
        /// The index URL.
        url: String,
    },

    /// The index body did not parse as a `PACKAGES` file.
    #[error("malformed package index: {0}")]
    Parse(#[from] ParseError),
}

/// HTTP client for the snapshot repository, with retry support for the
/// index fetch.
#[derive(Debug, Clone)]
pub struct IndexClient {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl IndexClient {
    /// Create a new client with the default timeout and retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    /// Override the retry policy (tests use a short delay).
    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    /// Access the inner HTTP client, shared with the download path.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetch and parse the index of the snapshot at `repo_url`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexFetchError::Network`] once transient failures exhaust
    /// the retry budget, and [`IndexFetchError::Status`] /
    /// [`IndexFetchError::Parse`] immediately -- both are fatal.
    pub async fn fetch_index(&self, repo_url: &str) -> Result<PackageIndex, IndexFetchError> {
        let index_url = format!("{}/src/contrib/PACKAGES", repo_url.trim_end_matches('/'));
        info!("fetching snapshot index from {index_url}");

        let mut attempt = 0;
        let body = loop {
            attempt += 1;
            match self.fetch_once(&index_url).await {
                Ok(body) => break body,
                Err(FetchAttempt::Status(status)) => {
                    return Err(IndexFetchError::Status {
                        status,
                        url: index_url,
                    });
                }
                Err(FetchAttempt::Network(e)) => {
                    if attempt >= self.max_retries {
                        return Err(IndexFetchError::Network {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    warn!("index fetch attempt {attempt} failed: {e}, retrying...");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
            }
        };

        let index = PackageIndex::parse(&body)?;
        info!("parsed snapshot index: {} packages", index.len());
        Ok(index)
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchAttempt> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchAttempt::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchAttempt::Status(status));
        }

        response.text().await.map_err(FetchAttempt::Network)
    }
}

/// Outcome of a single fetch attempt; `Network` is retryable.
enum FetchAttempt {
    Network(reqwest::Error),
    Status(reqwest::StatusCode),
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_BODY: &str = "Package: cli\nVersion: 3.6.3\n\nPackage: glue\nVersion: 1.7.0\nImports: cli\n";

    #[tokio::test]
    async fn fetches_and_parses_index() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/src/contrib/PACKAGES")
            .with_body(INDEX_BODY)
            .create_async()
            .await;

        let client = IndexClient::new().unwrap();
        let index = client.fetch_index(&server.url()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(index.len(), 2);
        assert_eq!(index.find("glue").unwrap().depends, vec!["cli"]);
    }

    #[tokio::test]
    async fn trailing_slash_is_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/src/contrib/PACKAGES")
            .with_body(INDEX_BODY)
            .create_async()
            .await;

        let client = IndexClient::new().unwrap();
        let url = format!("{}/", server.url());
        assert!(client.fetch_index(&url).await.is_ok());
    }

    #[tokio::test]
    async fn http_error_is_fatal_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/src/contrib/PACKAGES")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = IndexClient::new().unwrap();
        let err = client.fetch_index(&server.url()).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, IndexFetchError::Status { status, .. } if status == 404));
    }

    #[tokio::test]
    async fn unreachable_host_reports_attempts() {
        // Nothing listens on this port; connection is refused immediately.
        let client = IndexClient::new()
            .unwrap()
            .with_retry(2, Duration::from_millis(10));
        let err = client
            .fetch_index("http://127.0.0.1:1")
            .await
            .unwrap_err();

        assert!(matches!(err, IndexFetchError::Network { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn garbage_body_is_a_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/src/contrib/PACKAGES")
            .with_body("not an index at all\n")
            .create_async()
            .await;

        let client = IndexClient::new().unwrap();
        let err = client.fetch_index(&server.url()).await.unwrap_err();
        assert!(matches!(err, IndexFetchError::Parse(_)));
    }
}
