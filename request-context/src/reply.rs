use crate::errors::{ContextError, HandlerError};
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;

/// The response under construction for one request.
#[derive(Debug, Default)]
pub struct Reply {
    content: Option<Value>,
    error: Option<String>,
    status: Option<StatusCode>,
    params: HashMap<String, String>,
}

impl Reply {
    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    pub fn set_content(&mut self, content: impl Into<Value>) {
        self.content = Some(content.into());
    }

    /// Error message attached to the reply. Executors may report a failure here
    /// instead of returning an error; both go through the same classification.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Side-channel parameters for later pipeline stages, not sent to the caller.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }
}

/// Result of invoking business logic for one request.
#[derive(Debug)]
pub enum Outcome {
    /// The executor returned nothing; the reply is left as the executor left it
    Empty,
    Content(Value),
    Failure(ContextError),
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Empty => "empty",
            Outcome::Content(_) => "content",
            Outcome::Failure(_) => "failure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

impl From<Result<Option<Value>, HandlerError>> for Outcome {
    fn from(result: Result<Option<Value>, HandlerError>) -> Self {
        match result {
            Ok(None) => Outcome::Empty,
            Ok(Some(value)) => Outcome::Content(value),
            Err(e) => Outcome::Failure(ContextError::Executor(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_from_executor_result() {
        assert!(matches!(Outcome::from(Ok(None)), Outcome::Empty));

        let outcome = Outcome::from(Ok(Some(json!({"id": 7}))));
        assert_eq!(outcome.kind(), "content");

        let outcome = Outcome::from(Err::<Option<Value>, HandlerError>("db timeout".into()));
        assert!(outcome.is_failure());
        match outcome {
            Outcome::Failure(e) => assert_eq!(e.to_string(), "db timeout"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_reply_params() {
        let mut reply = Reply::default();
        assert!(reply.param("k").is_none());
        reply.set_param("k", "v");
        reply.set_content("hello");
        assert_eq!(reply.param("k"), Some("v"));
        assert_eq!(reply.content(), Some(&Value::String("hello".into())));
        assert_eq!(reply.params().len(), 1);
    }
}
