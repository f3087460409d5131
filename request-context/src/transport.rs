//! Buffered view of the inbound request, owned by a single request pipeline.
//!
//! The body is collected once when the request arrives. Form parsing is
//! lazy and cached, so building the context more than once never consumes
//! the body twice.

use crate::errors::{ContextError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::{BodyExt, Limited};
use indexmap::IndexMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

/// Field name to all of its values, in arrival order.
pub type ParamMap = IndexMap<String, Vec<String>>;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM: &str = "multipart/form-data";

/// Access to the raw request body and to the flattened request values.
#[async_trait]
pub trait RequestBody: Send + Sync {
    /// Returns the body decoded from `charset` (an encoding label such as
    /// "utf-8" or "gbk"). An empty label means UTF-8.
    fn read_body(&self, charset: &str) -> Result<String>;

    /// Merges query and form values into one flat mapping. Multi-valued fields are
    /// joined with commas and form values replace query values of the same name.
    async fn request_values(&self) -> Result<IndexMap<String, String>>;
}

pub struct RawRequest {
    parts: Parts,
    body: std::result::Result<Bytes, String>,
    query: Arc<ParamMap>,
    form: OnceCell<std::result::Result<Arc<ParamMap>, String>>,
    form_parses: AtomicUsize,
    max_form_bytes: u64,
    correlation_id: OnceLock<String>,
}

impl RawRequest {
    /// Collects the body of `request`, reading at most `max_form_bytes`. A body that
    /// fails to arrive or runs past the limit is remembered and reported on first use
    /// instead of failing here.
    pub async fn from_request<B>(request: Request<B>, max_form_bytes: u64) -> Self
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let limit = usize::try_from(max_form_bytes).unwrap_or(usize::MAX);
        let body = Limited::new(body, limit)
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| e.to_string());
        Self::new(parts, body, max_form_bytes)
    }

    /// Wraps a request whose body is already in memory.
    pub fn buffered(request: Request<Bytes>, max_form_bytes: u64) -> Self {
        let (parts, body) = request.into_parts();
        Self::new(parts, Ok(body), max_form_bytes)
    }

    /// Wraps a request whose body could not be read.
    pub fn with_failed_body(parts: Parts, reason: impl Into<String>, max_form_bytes: u64) -> Self {
        Self::new(parts, Err(reason.into()), max_form_bytes)
    }

    fn new(parts: Parts, body: std::result::Result<Bytes, String>, max_form_bytes: u64) -> Self {
        let query = Arc::new(parse_query(&parts.uri));
        Self {
            parts,
            body,
            query,
            form: OnceCell::new(),
            form_parses: AtomicUsize::new(0),
            max_form_bytes,
            correlation_id: OnceLock::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Values attached to the request by earlier stages of the pipeline.
    pub fn extensions(&self) -> &http::Extensions {
        &self.parts.extensions
    }

    /// The media type without parameters, lower-cased.
    pub fn content_type(&self) -> Option<String> {
        let value = self.parts.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let essence = value.split(';').next().unwrap_or(value).trim();
        Some(essence.to_ascii_lowercase())
    }

    /// Value of the named cookie, if sent.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"'))
    }

    pub fn query(&self) -> Arc<ParamMap> {
        self.query.clone()
    }

    /// Parses the posted form on first call and returns the cached result afterwards.
    ///
    /// Only urlencoded and multipart bodies are parsed; any other content type
    /// yields an empty form.
    pub async fn parse_form(&self) -> Result<Arc<ParamMap>> {
        let parsed = self
            .form
            .get_or_init(|| async {
                self.form_parses.fetch_add(1, Ordering::Relaxed);
                self.decode_form().await.map(Arc::new)
            })
            .await;
        parsed.clone().map_err(ContextError::FormParse)
    }

    /// Number of times the form body was actually decoded.
    pub fn form_parse_count(&self) -> usize {
        self.form_parses.load(Ordering::Relaxed)
    }

    /// Returns the correlation id attached to this request, assigning it with
    /// `derive` if none was attached yet. Once assigned it never changes.
    pub fn correlation_id_or_init(&self, derive: impl FnOnce() -> String) -> &str {
        self.correlation_id.get_or_init(derive)
    }

    fn body_bytes(&self) -> Result<&Bytes> {
        self.body
            .as_ref()
            .map_err(|reason| ContextError::BodyRead(reason.clone()))
    }

    async fn decode_form(&self) -> std::result::Result<ParamMap, String> {
        let content_type = self.content_type();
        match content_type.as_deref() {
            Some(FORM_URLENCODED) => {
                let body = self.body_bytes().map_err(|e| e.to_string())?;
                Ok(collect_pairs(url::form_urlencoded::parse(body)))
            }
            Some(MULTIPART_FORM) => {
                let body = self.body_bytes().map_err(|e| e.to_string())?.clone();
                let header = self
                    .parts
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                parse_multipart(header, body, self.max_form_bytes)
                    .await
                    .map_err(|e| e.to_string())
            }
            _ => Ok(ParamMap::new()),
        }
    }
}

#[async_trait]
impl RequestBody for RawRequest {
    fn read_body(&self, charset: &str) -> Result<String> {
        let body = self.body_bytes()?;
        let label = if charset.is_empty() { "utf-8" } else { charset };
        let encoding = encoding_rs::Encoding::for_label(label.as_bytes())
            .ok_or_else(|| ContextError::UnknownEncoding(label.to_string()))?;

        let (text, _, had_errors) = encoding.decode(body);
        if had_errors {
            return Err(ContextError::Decode(encoding.name().to_string()));
        }
        Ok(text.into_owned())
    }

    async fn request_values(&self) -> Result<IndexMap<String, String>> {
        let form = self.parse_form().await?;
        let mut values = IndexMap::new();
        for (key, all) in self.query.iter().chain(form.iter()) {
            values.insert(key.clone(), all.join(","));
        }
        Ok(values)
    }
}

fn parse_query(uri: &Uri) -> ParamMap {
    uri.query()
        .map(|query| collect_pairs(url::form_urlencoded::parse(query.as_bytes())))
        .unwrap_or_default()
}

fn collect_pairs<'a>(pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>) -> ParamMap {
    let mut params = ParamMap::new();
    for (key, value) in pairs {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Text fields of a multipart body. File parts are skipped.
async fn parse_multipart(
    content_type: &str,
    body: Bytes,
    max_bytes: u64,
) -> std::result::Result<ParamMap, multer::Error> {
    let boundary = multer::parse_boundary(content_type)?;
    let constraints =
        multer::Constraints::new().size_limit(multer::SizeLimit::new().whole_stream(max_bytes));
    let stream = futures_util::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::with_constraints(stream, boundary, constraints);

    let mut fields = ParamMap::new();
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let value = field.text().await?;
        fields.entry(name).or_default().push(value);
    }
    Ok(fields)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_FORM_BYTES;

    pub(crate) fn raw(builder: http::request::Builder, body: &'static [u8]) -> RawRequest {
        RawRequest::buffered(
            builder.body(Bytes::from_static(body)).unwrap(),
            DEFAULT_MAX_FORM_BYTES,
        )
    }

    const MULTIPART_BODY: &[u8] = b"--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
hello\r\n\
--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
file contents\r\n\
--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"tag\"\r\n\r\n\
a\r\n\
--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"tag\"\r\n\r\n\
b\r\n\
--XBOUNDARY--\r\n";

    #[test]
    fn test_query_keeps_all_values() {
        let req = raw(Request::builder().uri("/x?id=7&tag=a&tag=b&empty="), b"");
        let query = req.query();
        assert_eq!(query.len(), 3);
        assert_eq!(query["id"], vec!["7"]);
        assert_eq!(query["tag"], vec!["a", "b"]);
        assert_eq!(query["empty"], vec![""]);
    }

    #[tokio::test]
    async fn test_urlencoded_form_parsed_once() {
        let req = raw(
            Request::builder()
                .method("POST")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
                .uri("/x"),
            b"name=ada&lang=rust&lang=go",
        );

        let first = req.parse_form().await.unwrap();
        let second = req.parse_form().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(req.form_parse_count(), 1);
        assert_eq!(first["name"], vec!["ada"]);
        assert_eq!(first["lang"], vec!["rust", "go"]);
    }

    #[tokio::test]
    async fn test_multipart_form_skips_files() {
        let req = raw(
            Request::builder()
                .method("POST")
                .header(CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
                .uri("/upload"),
            MULTIPART_BODY,
        );

        let form = req.parse_form().await.unwrap();
        assert_eq!(form.len(), 2);
        assert_eq!(form["title"], vec!["hello"]);
        assert_eq!(form["tag"], vec!["a", "b"]);
        assert!(!form.contains_key("upload"));
    }

    #[tokio::test]
    async fn test_malformed_multipart_is_an_error() {
        let req = raw(
            Request::builder()
                .method("POST")
                .header(CONTENT_TYPE, "multipart/form-data")
                .uri("/upload"),
            b"garbage",
        );

        let err = req.parse_form().await.unwrap_err();
        assert!(matches!(err, ContextError::FormParse(_)));
        // The failure is cached as well
        assert!(req.parse_form().await.is_err());
        assert_eq!(req.form_parse_count(), 1);
    }

    #[tokio::test]
    async fn test_body_over_limit_is_not_buffered() {
        let request = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .uri("/x")
            .body(http_body_util::Full::new(Bytes::from(vec![b'a'; 64])))
            .unwrap();
        let req = RawRequest::from_request(request, 16).await;

        assert!(matches!(req.read_body(""), Err(ContextError::BodyRead(_))));
        assert!(matches!(
            req.parse_form().await,
            Err(ContextError::FormParse(_))
        ));
    }

    #[tokio::test]
    async fn test_body_within_limit_is_buffered() {
        let request = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .uri("/x")
            .body(http_body_util::Full::new(Bytes::from_static(b"name=ada")))
            .unwrap();
        let req = RawRequest::from_request(request, 8).await;

        assert_eq!(req.read_body("").unwrap(), "name=ada");
        assert_eq!(req.parse_form().await.unwrap()["name"], vec!["ada"]);
    }

    #[tokio::test]
    async fn test_non_form_content_type_yields_empty_form() {
        let req = raw(
            Request::builder()
                .method("POST")
                .header(CONTENT_TYPE, "application/json")
                .uri("/x"),
            b"{\"a\":1}",
        );
        assert!(req.parse_form().await.unwrap().is_empty());
        assert_eq!(req.read_body("").unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_read_body_with_charset() {
        // "中文" encoded as GBK
        let req = raw(Request::builder().uri("/x"), &[0xD6, 0xD0, 0xCE, 0xC4]);
        assert_eq!(req.read_body("gbk").unwrap(), "中文");
        assert!(matches!(
            req.read_body("utf-8"),
            Err(ContextError::Decode(_))
        ));
        assert!(matches!(
            req.read_body("no-such-charset"),
            Err(ContextError::UnknownEncoding(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_body_surfaces_on_use() {
        let (parts, _) = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .uri("/x?a=1")
            .body(())
            .unwrap()
            .into_parts();
        let req = RawRequest::with_failed_body(parts, "connection reset", DEFAULT_MAX_FORM_BYTES);

        assert!(matches!(req.read_body(""), Err(ContextError::BodyRead(_))));
        assert!(matches!(
            req.parse_form().await,
            Err(ContextError::FormParse(_))
        ));
        // The query string does not depend on the body
        assert_eq!(req.query()["a"], vec!["1"]);
    }

    #[tokio::test]
    async fn test_request_values_merge() {
        let req = raw(
            Request::builder()
                .method("POST")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .uri("/x?id=7&tag=a&tag=b&shared=query"),
            b"shared=form&name=ada",
        );

        let values = req.request_values().await.unwrap();
        assert_eq!(values["id"], "7");
        assert_eq!(values["tag"], "a,b");
        assert_eq!(values["shared"], "form");
        assert_eq!(values["name"], "ada");
    }

    #[test]
    fn test_cookie_lookup() {
        let req = raw(
            Request::builder()
                .uri("/x")
                .header(COOKIE, "theme=dark; ctx_sid=abc123")
                .header(COOKIE, "other=\"quoted\""),
            b"",
        );
        assert_eq!(req.cookie("ctx_sid"), Some("abc123"));
        assert_eq!(req.cookie("other"), Some("quoted"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn test_correlation_id_assigned_once() {
        let req = raw(Request::builder().uri("/x"), b"");
        let first = req.correlation_id_or_init(|| "one".to_string()).to_string();
        let second = req.correlation_id_or_init(|| "two".to_string());
        assert_eq!(first, "one");
        assert_eq!(second, "one");
    }
}
