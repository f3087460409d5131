use crate::adapter::{ContextHandler, Executor, Handled};
use crate::builder::ContextBuilder;
use crate::config::Config;
use crate::errors::ContextError;
use crate::input::PathParams;
use crate::state::RequestSummary;
use crate::transport::RawRequest;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderName, StatusCode};
use hyper::body::{Body, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use percent_encoding::percent_decode_str;
use routing::{Route, RouteActions};
use serde_json::Value;
use shared::http::{FullBody, full_body, make_boxed_error_response};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("no executor registered for service {0}")]
    UnknownService(String),
}

/// Authorization tag attached to the response for downstream stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTag(pub String);

impl Handled {
    /// Serializes the reply and caches the serialized body in the request state.
    pub fn render(&mut self) -> Result<(StatusCode, &'static str, String), ContextError> {
        let (status, content_type, body) = if let Some(error) = self.reply.error() {
            let status = self
                .reply
                .status()
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "text/plain; charset=utf-8", error.to_string())
        } else {
            let status = self.reply.status().unwrap_or(StatusCode::OK);
            match self.reply.content() {
                Some(Value::String(text)) => (status, "text/plain; charset=utf-8", text.clone()),
                Some(value) => (status, "application/json", serde_json::to_string(value)?),
                None => (status, "text/plain; charset=utf-8", String::new()),
            }
        };

        self.state.set_cached_response(body.as_str());
        Ok((status, content_type, body))
    }

    /// Builds the transport response. The correlation id is echoed in a header;
    /// the auth tag and a request summary travel in the response extensions.
    pub fn into_response(mut self) -> Result<Response<FullBody>, ContextError> {
        let (status, content_type, body) = self.render()?;

        let mut response = Response::builder()
            .status(status)
            .header(CONTENT_TYPE, content_type)
            .header(REQUEST_ID_HEADER, HeaderValue::try_from(self.state.correlation_id())?)
            .body(full_body(body))?;

        let extensions = response.extensions_mut();
        if let Some(tag) = self.state.auth_tag() {
            extensions.insert(AuthTag(tag.to_string()));
        }
        extensions.insert::<RequestSummary>(self.state.summary());

        Ok(response)
    }
}

/// Routes requests to their context handler and writes the result.
#[derive(Clone)]
pub struct ContextService {
    routes: Arc<RouteActions<Arc<ContextHandler>>>,
    max_form_bytes: u64,
}

impl ContextService {
    /// Creates one handler per configured route, looking executors up by service name.
    pub fn new(
        builder: ContextBuilder,
        executors: &HashMap<String, Arc<dyn Executor>>,
    ) -> Result<Self, SetupError> {
        let config: Arc<Config> = builder.config().clone();

        let routes = config
            .routes
            .iter()
            .map(|route| {
                let executor = executors
                    .get(&route.service)
                    .ok_or_else(|| SetupError::UnknownService(route.service.clone()))?;
                let handler = ContextHandler::new(
                    builder.clone(),
                    executor.clone(),
                    route.service.clone(),
                    route.settings.clone(),
                );
                let mut r = Route::new(None, Some(route.path.clone()), Arc::new(handler));
                if let Some(method) = &route.method {
                    r = r.with_method(method.into());
                }
                Ok(r)
            })
            .collect::<Result<Vec<_>, SetupError>>()?;

        Ok(Self {
            routes: Arc::new(RouteActions::new(routes)),
            max_form_bytes: config.max_form_bytes,
        })
    }

    pub async fn dispatch<B>(&self, request: Request<B>) -> Response<FullBody>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some((handler, path_params)) = self.routes.resolve(&request).map(|route_match| {
            (route_match.action.clone(), decode_path_params(&route_match.params))
        }) else {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                "No route matched"
            );
            return make_boxed_error_response(StatusCode::NOT_FOUND);
        };

        let raw = RawRequest::from_request(request, self.max_form_bytes).await;
        let handled = handler.handle(Arc::new(raw), path_params).await;
        let span = handled.state.span().clone();

        match handled.into_response() {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(parent: &span, error = %e, "Failed to write response");
                make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl Service<Request<Incoming>> for ContextService {
    type Response = Response<FullBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.dispatch(req).await) })
    }
}

/// Bound path segments arrive percent-encoded; query and form values are
/// already decoded, so decode these to match.
fn decode_path_params(params: &[(&str, &str)]) -> PathParams {
    PathParams::new(
        params
            .iter()
            .map(|(name, value)| {
                let decoded = percent_decode_str(value).decode_utf8_lossy();
                (name.to_string(), decoded.into_owned())
            })
            .collect(),
    )
}
