use crate::transport::RawRequest;
use std::fmt;

/// Correlation id attached to a request by an earlier pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide source of fresh correlation ids. Shared by all requests.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Mints UUID v4 ids in their simple (hyphen-less) form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Resolves the correlation id of `request`, checked in order:
/// an id already assigned to this request, an id attached by an earlier stage,
/// the session cookie, and finally a fresh id from `generator`.
pub fn correlation_id<'a>(
    request: &'a RawRequest,
    session_cookie: &str,
    generator: &dyn IdGenerator,
) -> &'a str {
    request.correlation_id_or_init(|| {
        if let Some(id) = request.extensions().get::<RequestId>()
            && !id.0.is_empty()
        {
            return id.0.clone();
        }
        match request.cookie(session_cookie) {
            Some(sid) if !sid.is_empty() => sid.to_string(),
            _ => generator.next_id(),
        }
    })
}
