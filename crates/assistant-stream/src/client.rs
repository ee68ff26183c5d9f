use futures::StreamExt as _;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::decoder::{ByteStream, EventStream, decode_event_stream};
use crate::errors::{ClientError, TransportError};
use crate::protocol::{ChatRequest, ChatResponse, StreamRequest};

const STREAM_PATH: &str = "chat/stream";
const CHAT_PATH: &str = "chat";
const HEALTH_PATH: &str = "health";

/// Transport seam between the conversation logic and the assistant backend.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Opens a streamed exchange.
    ///
    /// Status and body checks happen here, before any line is decoded; the
    /// returned stream only fails on read errors.
    async fn open_stream(&self, request: &StreamRequest) -> Result<EventStream, TransportError>;

    /// Performs a single-shot exchange.
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError>;

    /// Probes backend health. Never fails; any error reports `false`.
    async fn health(&self) -> bool;
}

/// [`ChatBackend`] over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Creates a backend from explicit configuration.
    pub fn new(config: BackendConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a backend using [`BackendConfig::from_env`].
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(BackendConfig::from_env()?)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ChatBackend for HttpBackend {
    async fn open_stream(&self, request: &StreamRequest) -> Result<EventStream, TransportError> {
        debug!(mode = %request.mode, session_id = %request.session_id, "opening chat stream");
        let response = self
            .client
            .post(self.config.endpoint(STREAM_PATH))
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let response = ensure_success(response).await?;
        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(TransportError::NoBody);
        }
        debug!(status = %response.status(), "chat stream opened");

        let bytes_stream: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string()))),
        );
        Ok(decode_event_stream(bytes_stream))
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        debug!(mode = %request.mode, "sending chat request");
        let response = self
            .client
            .post(self.config.endpoint(CHAT_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let response = ensure_success(response).await?;
        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn health(&self) -> bool {
        match self.client.get(self.config.endpoint(HEALTH_PATH)).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                debug!(status = %response.status(), healthy, "health probe finished");
                healthy
            }
            Err(e) => {
                warn!(error = %e, "health probe failed");
                false
            }
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}
