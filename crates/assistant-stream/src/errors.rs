/// Failures of the HTTP exchange with the backend.
///
/// A malformed individual stream line is not a transport failure; the decoder
/// drops such lines and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, DNS, timeout, ...).
    #[error("request failed: {0}")]
    Request(String),
    /// The backend answered with a non-success status.
    #[error("HTTP error! status: {status}")]
    Status { status: u16, body: String },
    /// The response carried no readable body.
    #[error("response has no readable body")]
    NoBody,
    /// Reading the response body failed after the exchange started.
    #[error("stream read failed: {0}")]
    Read(String),
    /// A single-shot response body was not the expected JSON shape.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status code associated with this error, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised while building a backend client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}
