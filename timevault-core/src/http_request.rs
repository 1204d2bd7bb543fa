use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{header::USER_AGENT, Method, RequestBuilder, Response, StatusCode};

use crate::store::{StoreError, StoreResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries after the first attempt.
const MAX_RETRIES: usize = 3;

/// HTTP client for the content stores.
///
/// Requests are described by a closure and rebuilt for every attempt, so bodies
/// `reqwest` cannot clone (multipart uploads) follow the same retry policy as
/// plain gateway reads.
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
    backoff: ExponentialBuilder,
}

impl HttpClient {
    /// Client with a 30 second per-attempt timeout.
    pub(crate) fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Client with a custom per-attempt timeout. Pinning large images needs more
    /// than the default.
    pub(crate) fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(200))
                .with_max_delay(Duration::from_secs(2))
                .with_max_times(MAX_RETRIES),
        }
    }

    /// `GET url`, retried on transient failures.
    pub(crate) async fn get(&self, url: &str) -> StoreResult<Response> {
        self.send(Method::GET, url, |request| request).await
    }

    /// Sends `method url` after `prepare` adds headers and body to a fresh
    /// builder. 429, 5xx, timeouts and connection failures are retried with
    /// exponential backoff; any other response is returned as is.
    pub(crate) async fn send<F>(&self, method: Method, url: &str, prepare: F) -> StoreResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        #[cfg(not(test))]
        ensure_https(url)?;

        let attempt = || execute(prepare(self.builder(method.clone(), url)));

        attempt
            .retry(self.backoff)
            .when(AttemptError::is_transient)
            .notify(|err, delay| {
                log::warn!("retrying {} in {delay:?}: {}", err.url, err.error);
            })
            .await
            .map_err(Into::into)
    }

    fn builder(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .timeout(self.timeout)
            .header(USER_AGENT, concat!("timevault-core/", env!("CARGO_PKG_VERSION")))
    }
}

#[cfg(not(test))]
fn ensure_https(url: &str) -> StoreResult<()> {
    if url.starts_with("https://") {
        return Ok(());
    }
    Err(StoreError::Http {
        url: url.to_string(),
        status: None,
        error: "refusing to send content over plain http".to_string(),
    })
}

/// Why one attempt failed.
#[derive(Debug)]
struct AttemptError {
    url: String,
    status: Option<u16>,
    error: String,
    transient: bool,
}

impl AttemptError {
    const fn is_transient(&self) -> bool {
        self.transient
    }
}

impl From<AttemptError> for StoreError {
    fn from(value: AttemptError) -> Self {
        Self::Http {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute(request: RequestBuilder) -> Result<Response, AttemptError> {
    let (client, request) = request.build_split();
    let request = request.map_err(|err| AttemptError {
        url: err.url().map_or_else(String::new, ToString::to_string),
        status: None,
        error: format!("invalid request: {err}"),
        transient: false,
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(response) => {
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(AttemptError {
                    url,
                    status: Some(status.as_u16()),
                    error: format!("server answered {status}"),
                    transient: true,
                });
            }
            Ok(response)
        }
        Err(err) => Err(AttemptError {
            url,
            status: None,
            transient: err.is_timeout() || err.is_connect(),
            error: err.to_string(),
        }),
    }
}
