use crate::config::Config;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Raw token or credential object produced by an authentication stage.
/// Opaque to this crate; consumers downcast it to the type they expect.
#[derive(Clone)]
pub struct Credential(Arc<dyn Any + Send + Sync>);

impl Credential {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Credential(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// Lifecycle data of one in-flight request.
///
/// Created by the context builder and finalized by the handler adapter. It is
/// never shared between requests and is dropped once the response is written.
#[derive(Debug)]
pub struct RequestState {
    correlation_id: String,
    started_at: Instant,
    span: tracing::Span,
    service_name: String,
    auth_tag: Option<String>,
    credential: Option<Credential>,
    circuit_breaker: bool,
    cached_response: Option<String>,
    config: Arc<Config>,
}

impl RequestState {
    pub(crate) fn new(
        correlation_id: String,
        span: tracing::Span,
        credential: Option<Credential>,
        circuit_breaker: bool,
        config: Arc<Config>,
    ) -> Self {
        Self {
            correlation_id,
            started_at: Instant::now(),
            span,
            service_name: String::new(),
            auth_tag: None,
            credential,
            circuit_breaker,
            cached_response: None,
            config,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the request started, measured on a monotonic clock.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Request-scoped logger. Events recorded inside it carry the correlation id.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn auth_tag(&self) -> Option<&str> {
        self.auth_tag.as_deref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn is_circuit_breaker(&self) -> bool {
        self.circuit_breaker
    }

    pub fn cached_response(&self) -> Option<&str> {
        self.cached_response.as_deref()
    }

    /// Configuration snapshot the request was built with.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Service name and auth tag joined by a space, for log lines.
    pub fn log_tags(&self) -> String {
        let mut tags = Vec::with_capacity(2);
        if !self.service_name.is_empty() {
            tags.push(self.service_name.as_str());
        }
        if let Some(tag) = &self.auth_tag {
            tags.push(tag.as_str());
        }
        tags.join(" ")
    }

    pub(crate) fn set_service_name(&mut self, name: impl Into<String>) {
        self.service_name = name.into();
        self.span.record("service", self.service_name.as_str());
    }

    pub(crate) fn set_auth_tag(&mut self, tag: impl Into<String>) {
        self.auth_tag = Some(tag.into());
    }

    pub(crate) fn set_cached_response(&mut self, raw: impl Into<String>) {
        self.cached_response = Some(raw.into());
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            correlation_id: self.correlation_id.clone(),
            service: self.service_name.clone(),
            auth_tag: self.auth_tag.clone(),
            circuit_breaker: self.circuit_breaker,
            elapsed: self.elapsed(),
        }
    }
}

/// Snapshot of a finished request, attached to the response for downstream
/// logging and metrics stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSummary {
    pub correlation_id: String,
    pub service: String,
    pub auth_tag: Option<String>,
    pub circuit_breaker: bool,
    pub elapsed: Duration,
}
