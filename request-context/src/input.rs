//! Read-only parameter sources backed by one part of the request.
//!
//! Every source answers `get` with `None` for a missing key and never
//! substitutes a default. Values never change for the lifetime of a request.

use crate::transport::ParamMap;
use std::collections::HashMap;
use std::sync::Arc;

pub trait InputSource: Send + Sync {
    /// The value bound to `key`, or `None` when this source does not have it.
    fn get(&self, key: &str) -> Option<&str>;

    /// Every key this source can answer, in no particular order.
    fn keys(&self) -> Vec<&str>;
}

/// URL query string. A repeated field answers with its first value.
#[derive(Debug, Clone)]
pub struct QuerySource {
    params: Arc<ParamMap>,
}

impl QuerySource {
    pub fn new(params: Arc<ParamMap>) -> Self {
        Self { params }
    }
}

impl InputSource for QuerySource {
    fn get(&self, key: &str) -> Option<&str> {
        first_value(&self.params, key)
    }

    fn keys(&self) -> Vec<&str> {
        self.params.keys().map(String::as_str).collect()
    }
}

/// Posted form fields (urlencoded or multipart). A repeated field answers with its first value.
#[derive(Debug, Clone)]
pub struct FormSource {
    fields: Arc<ParamMap>,
}

impl FormSource {
    pub fn new(fields: Arc<ParamMap>) -> Self {
        Self { fields }
    }
}

impl InputSource for FormSource {
    fn get(&self, key: &str) -> Option<&str> {
        first_value(&self.fields, key)
    }

    fn keys(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }
}

/// Parameters bound by the matched route, one per `{name}` segment.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    pub fn new(params: Vec<(String, String)>) -> Self {
        Self { params }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for PathParams {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl InputSource for PathParams {
    fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.params.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Static key/value settings configured on the route. Shared by all requests of that route.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    settings: Arc<HashMap<String, String>>,
}

impl StaticSettings {
    pub fn new(settings: Arc<HashMap<String, String>>) -> Self {
        Self { settings }
    }
}

impl InputSource for StaticSettings {
    fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.settings.keys().map(String::as_str).collect()
    }
}

/// Plain in-memory mapping.
impl InputSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        HashMap::keys(self).map(String::as_str).collect()
    }
}

fn first_value<'a>(params: &'a ParamMap, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|values| values.first())
        .map(String::as_str)
}
