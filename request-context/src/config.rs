use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Multipart bodies larger than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_FORM_BYTES: u64 = 32 << 20;

pub const DEFAULT_SESSION_COOKIE: &str = "ctx_sid";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Route {0} has an empty service name")]
    EmptyService(String),

    #[error("Duplicate route: {0}")]
    DuplicateRoute(String),

    #[error("Parameter source listed more than once in precedence: {0:?}")]
    DuplicateSource(SourceKind),

    #[error("Parameter source missing from precedence: {0:?}")]
    MissingSource(SourceKind),

    #[error("Session cookie name cannot be empty")]
    EmptySessionCookie,
}

/// HTTP methods supported for route matching
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<&HttpMethod> for http::Method {
    fn from(method: &HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

/// The user-facing parameter sources, in the order the composite view consults them.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Path,
    Form,
    Query,
    Settings,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Path,
        SourceKind::Form,
        SourceKind::Query,
        SourceKind::Settings,
    ];
}

fn default_precedence() -> Vec<SourceKind> {
    SourceKind::ALL.to_vec()
}

fn default_session_cookie() -> String {
    DEFAULT_SESSION_COOKIE.into()
}

fn default_max_form_bytes() -> u64 {
    DEFAULT_MAX_FORM_BYTES
}

/// Server configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming requests
    #[serde(default)]
    pub listener: Listener,
    /// Debug mode exposes executor error messages to callers.
    /// In production mode every failure is reported as "Internal Server Error".
    #[serde(default)]
    pub debug: bool,
    /// Cookie carrying an existing session id, reused as the correlation id
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "default_max_form_bytes")]
    pub max_form_bytes: u64,
    /// Lookup order of the user-facing parameter sources; first hit wins
    #[serde(default = "default_precedence")]
    pub precedence: Vec<SourceKind>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            debug: false,
            session_cookie: default_session_cookie(),
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
            precedence: default_precedence(),
            routes: Vec::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.session_cookie.is_empty() {
            return Err(ValidationError::EmptySessionCookie);
        }

        let mut seen = HashSet::new();
        for kind in &self.precedence {
            if !seen.insert(*kind) {
                return Err(ValidationError::DuplicateSource(*kind));
            }
        }
        if let Some(missing) = SourceKind::ALL.iter().find(|kind| !seen.contains(*kind)) {
            return Err(ValidationError::MissingSource(*missing));
        }

        let mut routes = HashSet::new();
        for route in &self.routes {
            let key = route.describe();
            if route.service.is_empty() {
                return Err(ValidationError::EmptyService(key));
            }
            if !routes.insert(key.clone()) {
                return Err(ValidationError::DuplicateRoute(key));
            }
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// A route served by one executor
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RouteConfig {
    /// Path pattern, e.g. "/users/{id}"
    pub path: String,
    pub method: Option<HttpMethod>,
    /// Name of the executor handling this route
    pub service: String,
    /// Static key/value settings exposed to the executor as a parameter source
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl RouteConfig {
    fn describe(&self) -> String {
        match &self.method {
            Some(method) => format!("{method:?} {}", self.path),
            None => self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 8080
debug: true
precedence: [query, path, form, settings]
routes:
    - path: /users/{id}
      method: GET
      service: users.get
      settings:
          id: default
          region: eu
    - path: /users
      service: users.list
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 8080);
        assert!(config.debug);
        assert_eq!(config.session_cookie, DEFAULT_SESSION_COOKIE);
        assert_eq!(config.max_form_bytes, DEFAULT_MAX_FORM_BYTES);
        assert_eq!(config.precedence[0], SourceKind::Query);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].method, Some(HttpMethod::Get));
        assert_eq!(config.routes[0].settings.get("region").unwrap(), "eu");
        assert_eq!(config.routes[1].method, None);
        assert!(config.routes[1].settings.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("routes: []").unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.debug);
        assert_eq!(
            config.precedence,
            vec![
                SourceKind::Path,
                SourceKind::Form,
                SourceKind::Query,
                SourceKind::Settings
            ]
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = Config::default();
        config.precedence = vec![SourceKind::Path, SourceKind::Path];
        assert_eq!(
            config.validate(),
            Err(ValidationError::DuplicateSource(SourceKind::Path))
        );

        let mut config = Config::default();
        config.precedence = vec![SourceKind::Path, SourceKind::Form, SourceKind::Query];
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingSource(SourceKind::Settings))
        );

        let route = RouteConfig {
            path: "/a".into(),
            method: None,
            service: "a".into(),
            settings: HashMap::new(),
        };
        let mut config = Config::default();
        config.routes = vec![route.clone(), route.clone()];
        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateRoute(_))
        ));

        let mut config = Config::default();
        config.routes = vec![RouteConfig {
            service: String::new(),
            ..route
        }];
        assert!(matches!(
            config.validate(),
            Err(ValidationError::EmptyService(_))
        ));

        let mut config = Config::default();
        config.session_cookie = String::new();
        assert_eq!(config.validate(), Err(ValidationError::EmptySessionCookie));
    }
}
