use thiserror::Error;

/// Boxed error used as the `source` of transport and authentication failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building or executing an HTTP pipeline.
#[derive(Error, Debug)]
pub enum RestError {
    /// The client or pipeline configuration is invalid.
    ///
    /// Always raised while building, never while executing a call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint {
        message: String,
        #[source]
        source: Option<url::ParseError>,
    },

    /// The request could not be constructed (bad header value, unusable URL).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Signing the request or acquiring a token failed.
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The HTTP request failed at the transport level.
    #[error("Transport error after {attempts} attempt(s): {message}")]
    Transport {
        message: String,
        attempts: u32,
        #[source]
        source: Option<BoxError>,
    },

    /// The service answered with a non-success status code.
    #[error("Service error ({status}{}): {message}", .code.as_deref().map(|c| format!(", {c}")).unwrap_or_default())]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The call was cancelled or its deadline elapsed.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RestError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_endpoint_with_source(message: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    pub fn authentication_with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Authentication {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            attempts: 1,
            source: None,
        }
    }

    pub fn transport_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            message: message.into(),
            attempts: 1,
            source: Some(source.into()),
        }
    }

    pub fn service(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Record how many attempts were made before this error surfaced.
    ///
    /// Only transport errors carry an attempt count; other variants are
    /// returned unchanged.
    pub fn with_attempts(mut self, count: u32) -> Self {
        if let Self::Transport { attempts, .. } = &mut self {
            *attempts = count;
        }
        self
    }

    /// HTTP status code, if this error came from a service response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the retry policy may try the failed call again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "failed to connect"
        } else {
            "request failed"
        };
        Self::transport_with_source(message, err)
    }
}

/// Result type alias for pipeline operations.
pub type RestResult<T> = std::result::Result<T, RestError>;
