use std::time::Duration;

/// Why a connection attempt was rejected before any byte was streamed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("role '{0}' is not allowed to subscribe")]
    Forbidden(String),
}

impl AdmissionError {
    /// HTTP status the handler maps this to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotAuthenticated => 401,
            Self::Forbidden(_) => 403,
        }
    }
}

/// Client-side failures. All of these are recovered inside the reconnection
/// loop; none escape to the UI as anything but the stabilized tri-state.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("server returned status {0}")]
    Http(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream closed by server")]
    StreamClosed,
}

impl ClientError {
    /// Whether the reconnection loop should schedule another attempt.
    /// Admission failures won't succeed on retry without a new credential.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotAuthenticated | Self::Http(401) | Self::Http(403))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Http(_) => "http_status",
            Self::Transport(_) => "transport",
            Self::StreamClosed => "stream_closed",
        }
    }
}
