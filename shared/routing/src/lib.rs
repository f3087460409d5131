use http::Method;

#[derive(Debug)]
enum PathSegment {
    Static(String),
    Param(String),
}

#[derive(Debug)]
struct Path {
    segments: Vec<PathSegment>,
    has_trailing_splat: bool,
}

impl Path {
    /// Parses a path pattern string into a Path struct
    /// Supports:
    /// - Static segments: "/api/users"
    /// - Dynamic parameters: "/api/users/{id}"
    /// - Trailing splat: "/api/users/*"
    pub fn parse(path_str: &str) -> Self {
        let mut normalized_path = path_str.trim().trim_matches('/');

        let mut has_trailing_splat = false;
        if normalized_path == "*" {
            has_trailing_splat = true;
            normalized_path = "";
        } else if let Some(stripped) = normalized_path.strip_suffix("/*") {
            has_trailing_splat = true;
            normalized_path = stripped;
        }

        let segments: Vec<PathSegment> = if normalized_path.is_empty() {
            vec![]
        } else {
            normalized_path
                .split('/')
                .map(|s| {
                    if let Some(stripped) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                        PathSegment::Param(stripped.to_string())
                    } else {
                        PathSegment::Static(s.to_string())
                    }
                })
                .collect()
        };

        Path {
            segments,
            has_trailing_splat,
        }
    }

    /// Matches a request path against this path pattern.
    /// Bound parameters are returned in the order they appear in the pattern.
    fn matches<'a>(&'a self, request_path: &'a str) -> Option<Vec<(&'a str, &'a str)>> {
        let normalized_path = request_path.trim().trim_matches('/');

        let request_segments: Vec<&'a str> = if normalized_path.is_empty() {
            vec![]
        } else {
            normalized_path.split('/').collect()
        };

        let mut params = Vec::new();

        for (i_req, seg) in self.segments.iter().enumerate() {
            let req_segment = *request_segments.get(i_req)?;
            match seg {
                PathSegment::Static(s) => {
                    if req_segment != s {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    // A later binding of the same name replaces the earlier one
                    params.retain(|(existing, _)| *existing != name.as_str());
                    params.push((name.as_str(), req_segment));
                }
            }
        }

        if self.has_trailing_splat || self.segments.len() == request_segments.len() {
            Some(params)
        } else {
            None
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct RouteMatch<'a, A> {
    /// Route-bound parameters, one entry per `{name}` segment.
    pub params: Vec<(&'a str, &'a str)>,
    pub action: &'a A,
}

#[derive(Debug)]
pub struct Route<A> {
    host: Option<String>,
    method: Option<Method>,
    path: Option<Path>,
    action: A,
}

impl<A> Route<A> {
    /// Creates a new Route with the given host, path, and action
    pub fn new(host: Option<String>, path: Option<String>, action: A) -> Self {
        let parsed_path = path.map(|p| Path::parse(&p));
        Self {
            host,
            method: None,
            path: parsed_path,
            action,
        }
    }

    /// Restricts the route to a single HTTP method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Returns Some(RouteMatch) if the request matches this route, None otherwise.
    /// Trailing slash normalization is applied to incoming requests.
    pub fn matches<'a>(
        &'a self,
        request_host: Option<&str>,
        request_method: &Method,
        request_path: &'a str,
    ) -> Option<RouteMatch<'a, A>> {
        if self.host.is_some() && self.host.as_deref() != request_host {
            return None;
        }

        if let Some(method) = &self.method
            && method != request_method
        {
            return None;
        }

        match &self.path {
            Some(path) => {
                let params = path.matches(request_path)?;
                Some(RouteMatch {
                    params,
                    action: &self.action,
                })
            }
            // If no path is defined in the route, it matches anything
            None => Some(RouteMatch {
                params: Vec::new(),
                action: &self.action,
            }),
        }
    }
}

pub struct RouteActions<A> {
    routes: Vec<Route<A>>,
}

impl<A> RouteActions<A> {
    pub fn new(routes: Vec<Route<A>>) -> Self {
        Self { routes }
    }

    /// Matches the incoming request to a route, and returns the first matched route if any.
    /// If no matches are found, return none.
    pub fn resolve<'a, B>(&'a self, request: &'a http::Request<B>) -> Option<RouteMatch<'a, A>> {
        self.resolve_parts(request.uri(), request.method(), request.headers())
    }

    /// Same as [`RouteActions::resolve`], for callers that only hold the request head.
    pub fn resolve_parts<'a>(
        &'a self,
        uri: &'a http::Uri,
        method: &Method,
        headers: &'a http::HeaderMap,
    ) -> Option<RouteMatch<'a, A>> {
        // Host may come from authority part of URI (if absolute-form request)
        // or from the Host header (most common in HTTP/1.1).
        let host = uri.host().or_else(|| {
            headers
                .get(http::header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.split(':').next().unwrap_or(h))
        });

        self.routes
            .iter()
            .find_map(|route| route.matches(host, method, uri.path()))
    }
}
