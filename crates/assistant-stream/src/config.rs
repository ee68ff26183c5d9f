use std::time::Duration;

use crate::errors::ClientError;

/// Default API root of a locally running assistant backend.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Configuration for [`HttpBackend`](crate::HttpBackend).
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// API root; endpoint paths are appended to it.
    pub base_url: String,
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Optional overall timeout per request.
    ///
    /// For streamed exchanges this bounds the whole stream, so it is unset by
    /// default.
    pub request_timeout: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }
}

impl BackendConfig {
    /// Creates a config pointing at `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `ASSISTANT_API_BASE_URL` and `ASSISTANT_TIMEOUT_SECS`.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ASSISTANT_API_BASE_URL")
            && !url.trim().is_empty()
        {
            config.base_url = url.trim().to_string();
        }
        if let Ok(raw) = std::env::var("ASSISTANT_TIMEOUT_SECS")
            && !raw.trim().is_empty()
        {
            let secs: u64 = raw.trim().parse().map_err(|e| {
                ClientError::Config(format!("invalid ASSISTANT_TIMEOUT_SECS {raw:?}: {e}"))
            })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Overrides the API root.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets an overall per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(ClientError::Config("base_url must not be empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must start with http:// or https://, got {url:?}"
            )));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim().trim_end_matches('/'), path)
    }
}
