//! Ordered wildcard router.
//!
//! Routes are regular expressions matched anywhere in the request path.
//! Bindings are collected with a [`RouterBuilder`] during setup and frozen
//! into a [`Router`] before serving, so dispatch never takes a lock.
//!
//! Matching rules:
//!
//! - The path is cut at the first `?`, query strings never take part.
//! - The remaining path is percent-decoded before matching.
//! - Bindings are scanned newest first: the last registered match wins.
//! - Patterns are not anchored; add `^`/`$` when exact boundaries matter.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::debug;

use crate::error::Result;

/// Boxed response future returned by every handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Response<Full<Bytes>>> + Send>>;

/// A request processor bound to a route.
///
/// Implemented for any `Fn(Request<B>) -> impl Future<Output = Response<_>>`
/// closure, so handlers are usually plain async closures.
pub trait Handler<B>: Send + Sync {
    /// Handle one request.
    fn call(&self, req: Request<B>) -> HandlerFuture;
}

impl<B, F, Fut> Handler<B> for F
where
    F: Fn(Request<B>) -> Fut + Send + Sync,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    fn call(&self, req: Request<B>) -> HandlerFuture {
        Box::pin(self(req))
    }
}

struct Route<B> {
    pattern: Regex,
    handler: Box<dyn Handler<B>>,
}

/// Append-only route collection used during setup.
pub struct RouterBuilder<B> {
    routes: Vec<Route<B>>,
}

impl<B> RouterBuilder<B> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Compile `pattern` and bind it to `handler`.
    pub fn route(self, pattern: &str, handler: impl Handler<B> + 'static) -> Result<Self> {
        let pattern = Regex::new(pattern)?;
        Ok(self.route_regex(pattern, handler))
    }

    /// Bind an already compiled pattern to `handler`.
    pub fn route_regex(mut self, pattern: Regex, handler: impl Handler<B> + 'static) -> Self {
        self.routes.push(Route {
            pattern,
            handler: Box::new(handler),
        });
        self
    }

    /// Number of bindings registered so far.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no bindings are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freeze the bindings.
    pub fn build(self) -> Router<B> {
        Router {
            routes: self.routes.into(),
        }
    }
}

impl<B> Default for RouterBuilder<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable router snapshot, cheap to clone into every connection task.
pub struct Router<B> {
    routes: Arc<[Route<B>]>,
}

impl<B> Clone for Router<B> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<B> Router<B> {
    /// Start a new builder.
    pub fn builder() -> RouterBuilder<B> {
        RouterBuilder::new()
    }

    /// Find the handler for `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&dyn Handler<B>> {
        let path = path.split('?').next().unwrap_or_default();
        let path = decode_path(path);
        self.routes
            .iter()
            .rev()
            .find(|route| route.pattern.is_match(&path))
            .map(|route| route.handler.as_ref())
    }

    /// Dispatch a request to the newest matching handler.
    pub async fn dispatch(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let Some(handler) = self.resolve(req.uri().path()) else {
            debug!(path = req.uri().path(), "No route matched");
            return not_found();
        };
        handler.call(req).await
    }

    /// Number of frozen bindings.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the router has no bindings.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Percent-decode a request path.
///
/// Invalid UTF-8 after decoding is replaced, never rejected.
pub fn decode_path(path: &str) -> Cow<'_, str> {
    percent_decode_str(path).decode_utf8_lossy()
}

/// The standard not-found response.
pub fn not_found() -> Response<Full<Bytes>> {
    crate::handlers::error_response(StatusCode::NOT_FOUND, "404 page not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tag: &'static str) -> impl Handler<()> {
        move |_req: Request<()>| async move {
            Response::new(Full::new(Bytes::from_static(tag.as_bytes())))
        }
    }

    fn request(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    async fn body_of(router: &Router<()>, path: &str) -> (StatusCode, String) {
        use http_body_util::BodyExt;

        let resp = router.dispatch(request(path)).await;
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_last_registered_match_wins() {
        let router = Router::builder()
            .route("/a/.*", tagged("catch-all"))
            .unwrap()
            .route("/a/b", tagged("specific"))
            .unwrap()
            .build();

        assert_eq!(body_of(&router, "/a/b").await.1, "specific");
        assert_eq!(body_of(&router, "/a/c").await.1, "catch-all");
    }

    #[tokio::test]
    async fn test_earlier_route_shadowed_even_if_more_specific() {
        let router = Router::builder()
            .route("/a/b", tagged("specific"))
            .unwrap()
            .route("/a/.*", tagged("catch-all"))
            .unwrap()
            .build();

        assert_eq!(body_of(&router, "/a/b").await.1, "catch-all");
    }

    #[tokio::test]
    async fn test_query_string_ignored() {
        let router = Router::builder()
            .route("/a$", tagged("a"))
            .unwrap()
            .build();

        assert_eq!(body_of(&router, "/a?x=1").await.1, "a");
        assert_eq!(body_of(&router, "/a").await.1, "a");
        assert!(router.resolve("/a?x=1").is_some());
    }

    #[tokio::test]
    async fn test_unanchored_match() {
        let router = Router::builder()
            .route("/v2/tapService", tagged("tap"))
            .unwrap()
            .build();

        assert_eq!(body_of(&router, "/prefix/v2/tapService/extra").await.1, "tap");
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let router = Router::builder()
            .route("/only", tagged("only"))
            .unwrap()
            .build();

        let (status, body) = body_of(&router, "/other").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.trim_end(), "404 page not found");
    }

    #[tokio::test]
    async fn test_matches_decoded_path() {
        let router = Router::builder()
            .route("^/fission-function/my fn$", tagged("spaced"))
            .unwrap()
            .build();

        assert_eq!(body_of(&router, "/fission-function/my%20fn").await.1, "spaced");
        assert!(router.resolve("/fission-function/my%20fn?runtime=1").is_some());
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/a/b"), "/a/b");
        assert_eq!(decode_path("/a/my%20fn"), "/a/my fn");
        assert_eq!(decode_path("/ns%2Ffn"), "/ns/fn");
        assert_eq!(decode_path("/bad%zz"), "/bad%zz");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = RouterBuilder::<()>::new().route("(", tagged("bad"));
        assert!(matches!(result, Err(crate::SimfaasError::Pattern(_))));
    }

    #[test]
    fn test_clone_shares_routes() {
        let router = Router::builder()
            .route("/x", tagged("x"))
            .unwrap()
            .build();
        let cloned = router.clone();
        assert_eq!(cloned.len(), 1);
        assert!(!cloned.is_empty());
    }
}
