//! Built-in executors, selected by the `service` name of a route.

use async_trait::async_trait;
use request_context::extensions::AUTH_TAG_KEY;
use request_context::{Executor, HandlerError, ParameterView, Reply, RequestState};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

pub fn registry() -> HashMap<String, Arc<dyn Executor>> {
    HashMap::from([
        ("echo".to_string(), Arc::new(Echo) as Arc<dyn Executor>),
        ("values".to_string(), Arc::new(RequestValues) as Arc<dyn Executor>),
        ("body".to_string(), Arc::new(RawBody) as Arc<dyn Executor>),
    ])
}

/// Answers with every parameter as seen through the precedence rules.
/// An `auth_tag` parameter is handed on as the request's authorization tag.
pub struct Echo;

#[async_trait]
impl Executor for Echo {
    async fn execute(
        &self,
        params: &ParameterView,
        state: &RequestState,
        reply: &mut Reply,
    ) -> Result<Option<Value>, HandlerError> {
        if let Some(tag) = params.get("auth_tag") {
            reply.set_param(AUTH_TAG_KEY, tag);
        }

        let mut values = Map::new();
        for key in params.keys() {
            if !values.contains_key(key)
                && let Some(value) = params.get(key)
            {
                values.insert(key.to_string(), Value::from(value));
            }
        }

        Ok(Some(json!({
            "request_id": state.correlation_id(),
            "params": values,
        })))
    }
}

/// Answers with query and form values flattened into one object.
pub struct RequestValues;

#[async_trait]
impl Executor for RequestValues {
    async fn execute(
        &self,
        params: &ParameterView,
        _state: &RequestState,
        _reply: &mut Reply,
    ) -> Result<Option<Value>, HandlerError> {
        let values = params.extensions().body().request_values().await?;
        Ok(Some(serde_json::to_value(values)?))
    }
}

/// Answers with the raw body, decoded with the `charset` parameter (UTF-8 by default).
pub struct RawBody;

#[async_trait]
impl Executor for RawBody {
    async fn execute(
        &self,
        params: &ParameterView,
        _state: &RequestState,
        _reply: &mut Reply,
    ) -> Result<Option<Value>, HandlerError> {
        let charset = params.get("charset").unwrap_or("utf-8");
        let body = params.extensions().body().read_body(charset)?;
        Ok(Some(Value::String(body)))
    }
}
