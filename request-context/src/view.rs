use crate::config::SourceKind;
use crate::extensions::{Extensions, is_reserved};
use crate::input::InputSource;
use std::str::FromStr;

/// Read-only lookup surface over every parameter source of one request.
///
/// User sources are consulted in precedence order and the first hit wins.
/// Reserved keys are answered by the extension bundle alone.
pub struct ParameterView {
    sources: Vec<(SourceKind, Box<dyn InputSource>)>,
    extensions: Extensions,
}

impl ParameterView {
    pub fn new(sources: Vec<(SourceKind, Box<dyn InputSource>)>, extensions: Extensions) -> Self {
        Self {
            sources,
            extensions,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if is_reserved(key) {
            return self.extensions.get(key);
        }
        self.sources.iter().find_map(|(_, source)| source.get(key))
    }

    /// Looks `key` up in a single source, ignoring precedence.
    pub fn get_from(&self, kind: SourceKind, key: &str) -> Option<&str> {
        if is_reserved(key) {
            return None;
        }
        self.sources
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, source)| source.get(key))
    }

    /// Parses the value of `key`. `None` means the key is absent, which is
    /// distinct from a value that fails to parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<Result<T, T::Err>> {
        self.get(key).map(str::parse)
    }

    /// Keys of every source, user sources first. A key present in several
    /// sources is listed once per source.
    pub fn keys(&self) -> Vec<&str> {
        self.sources
            .iter()
            .flat_map(|(_, source)| source.keys())
            .filter(|key| !is_reserved(key))
            .chain(self.extensions.keys())
            .collect()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Source kinds in the order they are consulted.
    pub fn precedence(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.sources.iter().map(|(kind, _)| *kind)
    }
}

impl InputSource for ParameterView {
    fn get(&self, key: &str) -> Option<&str> {
        ParameterView::get(self, key)
    }

    fn keys(&self) -> Vec<&str> {
        ParameterView::keys(self)
    }
}
