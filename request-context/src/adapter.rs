use crate::builder::{BuiltContext, ContextBuilder};
use crate::errors::{ContextError, HandlerError};
use crate::extensions::AUTH_TAG_KEY;
use crate::input::{PathParams, StaticSettings};
use crate::metrics_defs::{REQUEST_DURATION, REQUEST_FAILURES, REQUESTS_INFLIGHT};
use crate::reply::{Outcome, Reply};
use crate::state::RequestState;
use crate::transport::RawRequest;
use crate::view::ParameterView;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use shared::{counter, gauge, histogram};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Prefix of every classified error message.
pub const ERROR_PREFIX: &str = "error:";

/// What callers see for any failure in production mode.
pub const GENERIC_ERROR: &str = "Internal Server Error";

/// Business logic behind a route.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Handles one request. Returning `Ok(None)` leaves the reply untouched.
    async fn execute(
        &self,
        params: &ParameterView,
        state: &RequestState,
        reply: &mut Reply,
    ) -> Result<Option<Value>, HandlerError>;
}

/// How much error detail reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskingPolicy {
    /// Callers see the classified error message
    Debug,
    /// Callers see a fixed generic message
    Production,
}

impl MaskingPolicy {
    pub fn from_debug(debug: bool) -> Self {
        if debug {
            MaskingPolicy::Debug
        } else {
            MaskingPolicy::Production
        }
    }

    /// The message shown to the caller for an already prefixed error.
    pub fn caller_message(&self, classified: &str) -> String {
        match self {
            MaskingPolicy::Debug => classified.to_string(),
            MaskingPolicy::Production => format!("{ERROR_PREFIX}{GENERIC_ERROR}"),
        }
    }
}

/// A request that went through the whole pipeline.
#[derive(Debug)]
pub struct Handled {
    pub outcome: Outcome,
    pub reply: Reply,
    pub state: RequestState,
}

/// Runs one request from context construction to a classified reply.
pub struct ContextHandler {
    builder: ContextBuilder,
    executor: Arc<dyn Executor>,
    service: String,
    settings: Arc<HashMap<String, String>>,
    policy: MaskingPolicy,
}

impl ContextHandler {
    pub fn new(
        builder: ContextBuilder,
        executor: Arc<dyn Executor>,
        service: impl Into<String>,
        settings: HashMap<String, String>,
    ) -> Self {
        let policy = MaskingPolicy::from_debug(builder.config().debug);
        Self {
            builder,
            executor,
            service: service.into(),
            settings: Arc::new(settings),
            policy,
        }
    }

    /// Overrides the masking policy derived from the configuration.
    pub fn with_policy(mut self, policy: MaskingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn policy(&self) -> MaskingPolicy {
        self.policy
    }

    pub async fn handle(&self, raw: Arc<RawRequest>, path_params: PathParams) -> Handled {
        let _inflight = InflightGuard::acquire();

        let BuiltContext { params, mut state } = self
            .builder
            .build(raw, path_params, StaticSettings::new(self.settings.clone()))
            .await;
        let mut reply = Reply::default();

        let outcome = match params {
            Ok(params) => self.execute(&params, &state, &mut reply).await,
            Err(e) => Outcome::Failure(e),
        };

        self.classify(&outcome, &mut state, &mut reply);

        state.set_service_name(self.service.as_str());
        histogram!(
            REQUEST_DURATION,
            "service" => self.service.clone(),
            "outcome" => outcome.kind(),
        )
        .record(state.elapsed().as_secs_f64());

        Handled {
            outcome,
            reply,
            state,
        }
    }

    async fn execute(
        &self,
        params: &ParameterView,
        state: &RequestState,
        reply: &mut Reply,
    ) -> Outcome {
        let result = AssertUnwindSafe(self.executor.execute(params, state, reply))
            .catch_unwind()
            .await;

        match result {
            Ok(result) => Outcome::from(result),
            Err(payload) => Outcome::Failure(ContextError::Panic(panic_message(payload))),
        }
    }

    fn classify(&self, outcome: &Outcome, state: &mut RequestState, reply: &mut Reply) {
        if let Outcome::Content(value) = outcome {
            reply.set_content(value.clone());
        }

        if let Some(tag) = reply.param(AUTH_TAG_KEY) {
            state.set_auth_tag(tag);
        }

        let (message, kind) = match outcome {
            Outcome::Failure(e) => (e.to_string(), failure_kind(e)),
            _ => match reply.error() {
                Some(message) => (message.to_string(), "business"),
                None => return,
            },
        };

        let classified = format!("{ERROR_PREFIX}{message}");
        tracing::error!(parent: state.span(), kind, error = %classified, "Request failed");
        counter!(REQUEST_FAILURES, "service" => self.service.clone(), "kind" => kind).increment(1);

        reply.set_error(self.policy.caller_message(&classified));
    }
}

fn failure_kind(error: &ContextError) -> &'static str {
    match error {
        e if e.is_business() => "business",
        ContextError::FormParse(_)
        | ContextError::BodyRead(_)
        | ContextError::UnknownEncoding(_)
        | ContextError::Decode(_) => "source",
        _ => "internal",
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Holds one unit of the in-flight gauge. Released on drop, so a request
/// future cancelled mid-flight still gives its slot back.
struct InflightGuard(metrics::Gauge);

impl InflightGuard {
    fn acquire() -> Self {
        let gauge = gauge!(REQUESTS_INFLIGHT);
        gauge.increment(1.0);
        Self(gauge)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}
