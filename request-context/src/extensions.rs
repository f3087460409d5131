//! Request-derived values handed to business logic alongside the user parameters.
//!
//! String values are addressed through reserved keys that start with `__`.
//! User-supplied parameters can never answer for those keys.

use crate::input::InputSource;
use crate::state::Credential;
use crate::transport::{RawRequest, RequestBody};
use http::HeaderMap;
use std::sync::Arc;

pub const RESERVED_PREFIX: &str = "__";

pub const REQUEST_ID_KEY: &str = "__request_id_";
pub const METHOD_KEY: &str = "__method_";
pub const PATH_KEY: &str = "__path_";
pub const CIRCUIT_BREAKER_KEY: &str = "__is_circuit_breaker_";

/// Reply parameter through which an executor hands an authorization tag to later stages.
pub const AUTH_TAG_KEY: &str = "__auth_tag_";

pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Circuit-breaker signal attached to the request by an outer stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreaker(pub bool);

pub struct Extensions {
    request_id: String,
    method: String,
    path: String,
    circuit_breaker: bool,
    credential: Option<Credential>,
    raw: Arc<RawRequest>,
}

impl Extensions {
    pub(crate) fn new(request_id: String, raw: Arc<RawRequest>) -> Self {
        let circuit_breaker = raw
            .extensions()
            .get::<CircuitBreaker>()
            .is_some_and(|cb| cb.0);
        let credential = raw.extensions().get::<Credential>().cloned();

        Self {
            request_id,
            method: raw.method().as_str().to_lowercase(),
            path: raw.uri().path().to_string(),
            circuit_breaker,
            credential,
            raw,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Lower-cased request method
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        self.raw.headers()
    }

    pub fn is_circuit_breaker(&self) -> bool {
        self.circuit_breaker
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn body(&self) -> &dyn RequestBody {
        self.raw.as_ref()
    }

    pub fn raw(&self) -> &Arc<RawRequest> {
        &self.raw
    }
}

impl InputSource for Extensions {
    fn get(&self, key: &str) -> Option<&str> {
        match key {
            REQUEST_ID_KEY => Some(&self.request_id),
            METHOD_KEY => Some(&self.method),
            PATH_KEY => Some(&self.path),
            CIRCUIT_BREAKER_KEY => Some(if self.circuit_breaker { "true" } else { "false" }),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        vec![REQUEST_ID_KEY, METHOD_KEY, PATH_KEY, CIRCUIT_BREAKER_KEY]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::raw;
    use http::Request;

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved(METHOD_KEY));
        assert!(is_reserved(AUTH_TAG_KEY));
        assert!(!is_reserved("method"));
        assert!(!is_reserved("_single"));
    }

    #[test]
    fn test_values_derived_from_request() {
        let req = raw(
            Request::builder()
                .method("PATCH")
                .uri("/Users/%7Bid%7D?x=1")
                .header("x-trace", "t1")
                .extension(CircuitBreaker(true))
                .extension(Credential::new("token-abc".to_string())),
            b"payload",
        );
        let ext = Extensions::new("rid-1".into(), Arc::new(req));

        assert_eq!(ext.get(REQUEST_ID_KEY), Some("rid-1"));
        assert_eq!(ext.get(METHOD_KEY), Some("patch"));
        assert_eq!(ext.get(PATH_KEY), Some("/Users/%7Bid%7D"));
        assert_eq!(ext.get(CIRCUIT_BREAKER_KEY), Some("true"));
        assert_eq!(ext.get("__unknown_"), None);
        assert_eq!(ext.keys().len(), 4);
        assert_eq!(ext.headers().get("x-trace").unwrap(), "t1");
        assert_eq!(
            ext.credential().and_then(|c| c.downcast_ref::<String>()),
            Some(&"token-abc".to_string())
        );
        assert_eq!(ext.body().read_body("utf-8").unwrap(), "payload");
    }

    #[test]
    fn test_circuit_breaker_defaults_to_false() {
        let ext = Extensions::new("rid".into(), Arc::new(raw(Request::builder().uri("/"), b"")));
        assert!(!ext.is_circuit_breaker());
        assert_eq!(ext.get(CIRCUIT_BREAKER_KEY), Some("false"));
        assert!(ext.credential().is_none());
    }
}
