//! HTTP client implementation

use crate::config::HttpConfig;
use crate::errors::HttpError;
use crate::types::{HttpMethod, HttpRequest, HttpResponse};
use parking_lot::RwLock;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// HTTP client trait used by the workflow executor
///
/// Implementations must be safe to share across every virtual user of a run.
/// A completed exchange is reported as `Ok` whatever its status code; `Err` is
/// reserved for calls that never produced a response (connect failure,
/// timeout, malformed request).
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Canned response served in offline mode
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// Simulated server latency
    pub delay: Duration,
    /// Report a timeout instead of a response
    pub timed_out: bool,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Response with a JSON body
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status,
            body: body.to_string().into_bytes(),
            headers,
            ..Default::default()
        }
    }

    /// A call that never answers within its timeout
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// HTTP Manager backed by a pooled reqwest client, with mock support
#[derive(Debug)]
pub struct HttpManager {
    client: Client,
    offline: bool,
    mocks: RwLock<HashMap<String, MockResponse>>,
    config: HttpConfig,
}

impl HttpManager {
    /// Create a new HttpManager in online mode with default configuration
    pub fn new() -> Result<Self, HttpError> {
        Self::with_config(HttpConfig::default())
    }

    /// Create a new HttpManager with specific configuration
    ///
    /// One client is built up front so every virtual user shares the same
    /// connection pool.
    pub fn with_config(config: HttpConfig) -> Result<Self, HttpError> {
        debug!(
            "Creating HttpManager with timeout: {}s, pool size per host: {}",
            config.timeout.as_secs(),
            config.max_idle_per_host
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build()?;

        Ok(Self {
            client,
            offline: false,
            mocks: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Create a manager that only serves registered mocks
    pub fn offline() -> Result<Self, HttpError> {
        let mut manager = Self::new()?;
        manager.set_offline();
        Ok(manager)
    }

    /// Set offline mode
    pub fn set_offline(&mut self) {
        self.offline = true;
        debug!("HttpManager set to offline mode");
    }

    /// Set online mode
    pub fn set_online(&mut self) {
        self.offline = false;
        debug!("HttpManager set to online mode");
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Add a single HTTP mock, keyed as "METHOD:URL"
    pub fn add_mock(&self, method: HttpMethod, url: &str, response: MockResponse) {
        let key = format!("{}:{}", method.as_str(), url);
        self.mocks.write().insert(key, response);
        debug!("Added HTTP mock for {} {}", method, url);
    }

    /// Clear all mocks
    pub fn clear_mocks(&self) {
        self.mocks.write().clear();
        debug!("Cleared all HTTP mocks");
    }

    /// Exact "METHOD:URL" match first, then the first partial URL match
    fn find_mock(&self, method: HttpMethod, url: &str) -> Option<MockResponse> {
        let mocks = self.mocks.read();
        let key = format!("{}:{}", method.as_str(), url);
        if let Some(mock) = mocks.get(&key) {
            return Some(mock.clone());
        }

        // Query strings are ignored for partial matches
        let path = url.split('?').next().unwrap_or(url);
        mocks
            .iter()
            .filter_map(|(key, mock)| {
                let (mock_method, mock_url) = key.split_once(':')?;
                let matches = mock_method.eq_ignore_ascii_case(method.as_str())
                    && (path.ends_with(mock_url) || mock_url.ends_with(path));
                matches.then(|| (mock_url.len(), mock))
            })
            // Prefer the most specific mock
            .max_by_key(|(len, _)| *len)
            .map(|(_, mock)| mock.clone())
    }

    async fn send_mock(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let start = Instant::now();

        let Some(mock) = self.find_mock(request.method, &request.url) else {
            debug!(
                "No matching mock response found for {} {}",
                request.method, request.url
            );
            return Err(HttpError::MockNotFound(format!(
                "{} {}",
                request.method, request.url
            )));
        };

        if mock.timed_out || mock.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(HttpError::Timeout(timeout));
        }

        if !mock.delay.is_zero() {
            tokio::time::sleep(mock.delay).await;
        }

        Ok(HttpResponse {
            status: mock.status,
            headers: mock.headers,
            body: mock.body,
            elapsed: start.elapsed(),
        })
    }
}

#[async_trait::async_trait]
impl HttpClient for HttpManager {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        if self.offline {
            return self.send_mock(request).await;
        }

        trace!("{} {}", request.method, request.url);

        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let mut builder = self
            .client
            .request(reqwest::Method::from(request.method), &request.url)
            .timeout(timeout);

        for (name, value) in &request.headers {
            let header_name = HeaderName::from_str(name)
                .map_err(|_| HttpError::InvalidHeaderName(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| HttpError::InvalidHeaderName(format!("{}: {}", name, value)))?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                HttpError::Timeout(timeout)
            } else if e.is_builder() {
                HttpError::InvalidUrl(format!("{}: {}", request.url, e))
            } else {
                HttpError::NetworkError(e)
            }
        };

        let start = Instant::now();
        let response = builder.send().await.map_err(map_err)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(map_err)?.to_vec();
        let elapsed = start.elapsed();

        trace!(
            "{} {} -> {} in {:?} ({} bytes)",
            request.method,
            request.url,
            status,
            elapsed,
            body.len()
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
            elapsed,
        })
    }
}
