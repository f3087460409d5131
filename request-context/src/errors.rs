use thiserror::Error;

/// Result type alias for request-context operations
pub type Result<T, E = ContextError> = std::result::Result<T, E>;

/// Error returned by business executors.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building a request context or running its executor
#[derive(Error, Debug)]
pub enum ContextError {
    /// The posted form could not be parsed (malformed multipart, oversized body, ...)
    #[error("failed to parse form body: {0}")]
    FormParse(String),

    /// The transport body could not be read, e.g. because the client went away
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("unknown character encoding: {0}")]
    UnknownEncoding(String),

    #[error("request body is not valid {0}")]
    Decode(String),

    /// Error raised explicitly by the business executor
    #[error("{0}")]
    Executor(HandlerError),

    /// Error reported by the executor through the reply instead of its return value
    #[error("{0}")]
    Reported(String),

    /// The executor panicked
    #[error("executor panicked: {0}")]
    Panic(String),

    #[error("failed to build response: {0}")]
    ResponseBuild(#[from] http::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("failed to serialize response content: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ContextError {
    /// Whether the error originates in business logic rather than in the framework.
    pub fn is_business(&self) -> bool {
        matches!(self, ContextError::Executor(_) | ContextError::Reported(_))
    }
}

impl From<HandlerError> for ContextError {
    fn from(e: HandlerError) -> Self {
        ContextError::Executor(e)
    }
}
