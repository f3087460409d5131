use crate::config::{Config, SourceKind};
use crate::correlation::{IdGenerator, UuidGenerator, correlation_id};
use crate::errors::Result;
use crate::extensions::Extensions;
use crate::input::{FormSource, InputSource, PathParams, QuerySource, StaticSettings};
use crate::state::RequestState;
use crate::transport::RawRequest;
use crate::view::ParameterView;
use std::sync::Arc;

/// Parameter view and lifecycle state of one request.
///
/// The state always exists. The view is missing when a parameter source could
/// not be read; the adapter reports that as a failure without running the executor.
pub struct BuiltContext {
    pub params: Result<ParameterView>,
    pub state: RequestState,
}

/// Assembles the per-request context from the buffered transport request.
#[derive(Clone)]
pub struct ContextBuilder {
    config: Arc<Config>,
    ids: Arc<dyn IdGenerator>,
}

impl ContextBuilder {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            ids: Arc::new(UuidGenerator),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Builds the context of `raw`.
    ///
    /// Building again from the same request reuses the parsed form and the
    /// assigned correlation id.
    pub async fn build(
        &self,
        raw: Arc<RawRequest>,
        path_params: PathParams,
        settings: StaticSettings,
    ) -> BuiltContext {
        let request_id =
            correlation_id(&raw, &self.config.session_cookie, self.ids.as_ref()).to_string();

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %raw.method(),
            path = %raw.uri().path(),
            service = tracing::field::Empty,
        );

        let extensions = Extensions::new(request_id.clone(), raw.clone());
        let state = RequestState::new(
            request_id,
            span,
            extensions.credential().cloned(),
            extensions.is_circuit_breaker(),
            self.config.clone(),
        );

        let params = raw.parse_form().await.map(|form| {
            let mut path_params = Some(path_params);
            let mut settings = Some(settings);
            let mut form = Some(form);
            let sources = self
                .config
                .precedence
                .iter()
                .filter_map(|kind| {
                    let source: Box<dyn InputSource> = match kind {
                        SourceKind::Path => Box::new(path_params.take()?),
                        SourceKind::Form => Box::new(FormSource::new(form.take()?)),
                        SourceKind::Query => Box::new(QuerySource::new(raw.query())),
                        SourceKind::Settings => Box::new(settings.take()?),
                    };
                    Some((*kind, source))
                })
                .collect();
            ParameterView::new(sources, extensions)
        });

        BuiltContext { params, state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::RequestId;
    use crate::errors::ContextError;
    use crate::extensions::{CircuitBreaker, METHOD_KEY, PATH_KEY};
    use crate::transport::tests::raw;
    use http::Request;
    use http::header::CONTENT_TYPE;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> StaticSettings {
        StaticSettings::new(Arc::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        ))
    }

    fn form_request() -> Arc<RawRequest> {
        Arc::new(raw(
            Request::builder()
                .method("POST")
                .uri("/users/42?id=7&page=2")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded"),
            b"id=form&name=ada",
        ))
    }

    #[tokio::test]
    async fn test_default_precedence() {
        let builder = ContextBuilder::new(Arc::new(Config::default()));
        let built = builder
            .build(
                form_request(),
                [("id", "42")].into_iter().collect(),
                settings(&[("id", "default"), ("region", "eu")]),
            )
            .await;

        let params = built.params.unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("name"), Some("ada"));
        assert_eq!(params.get("page"), Some("2"));
        assert_eq!(params.get("region"), Some("eu"));
        assert_eq!(params.get(METHOD_KEY), Some("post"));
        assert_eq!(params.get(PATH_KEY), Some("/users/42"));
        assert_eq!(
            params.precedence().collect::<Vec<_>>(),
            SourceKind::ALL.to_vec()
        );
    }

    #[tokio::test]
    async fn test_configured_precedence() {
        let config = Config {
            precedence: vec![
                SourceKind::Query,
                SourceKind::Form,
                SourceKind::Path,
                SourceKind::Settings,
            ],
            ..Config::default()
        };
        let builder = ContextBuilder::new(Arc::new(config));
        let built = builder
            .build(
                form_request(),
                [("id", "42")].into_iter().collect(),
                settings(&[]),
            )
            .await;
        assert_eq!(built.params.unwrap().get("id"), Some("7"));
    }

    #[tokio::test]
    async fn test_building_twice_does_not_reparse() {
        let builder = ContextBuilder::new(Arc::new(Config::default()));
        let request = form_request();

        let first = builder
            .build(request.clone(), PathParams::default(), settings(&[]))
            .await;
        let second = builder
            .build(request.clone(), PathParams::default(), settings(&[]))
            .await;

        let first_params = first.params.unwrap();
        let second_params = second.params.unwrap();
        assert_eq!(first_params.keys(), second_params.keys());
        assert_eq!(first_params.get("name"), second_params.get("name"));
        assert_eq!(first.state.correlation_id(), second.state.correlation_id());
        assert_eq!(request.form_parse_count(), 1);
    }

    #[tokio::test]
    async fn test_state_populated_from_request() {
        let builder = ContextBuilder::new(Arc::new(Config::default()));
        let request = Arc::new(raw(
            Request::builder()
                .uri("/")
                .extension(RequestId("rid-upstream".into()))
                .extension(CircuitBreaker(true)),
            b"",
        ));

        let built = builder
            .build(request, PathParams::default(), settings(&[]))
            .await;
        assert_eq!(built.state.correlation_id(), "rid-upstream");
        assert!(built.state.is_circuit_breaker());
        assert!(built.state.auth_tag().is_none());
        assert!(built.state.credential().is_none());
        assert_eq!(built.state.service_name(), "");
        assert_eq!(
            built.params.unwrap().extensions().request_id(),
            "rid-upstream"
        );
    }

    #[tokio::test]
    async fn test_form_failure_still_yields_state() {
        let builder = ContextBuilder::new(Arc::new(Config::default()));
        let request = Arc::new(raw(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(CONTENT_TYPE, "multipart/form-data"),
            b"not multipart",
        ));

        let built = builder
            .build(request, PathParams::default(), settings(&[]))
            .await;
        assert!(matches!(built.params, Err(ContextError::FormParse(_))));
        assert!(!built.state.correlation_id().is_empty());
    }
}
