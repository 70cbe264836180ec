//! Request ids and request tracing for the HTTP surface.
//!
//! Every request carries `x-request-id`, taken from the client when present and generated
//! otherwise. It is echoed on the response and attached to the request's tracing span so
//! manager logs for one HTTP call can be correlated.

use axum::{
    body::Body,
    http::{header::HeaderValue, HeaderName, Request},
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{HttpMakeClassifier, TraceLayer},
};
use tracing::Span;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Copy, Default)]
pub struct UuidRequestIdGenerator;

impl MakeRequestId for UuidRequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).ok()?))
    }
}

/// Layers that set `x-request-id` when missing and copy it onto the response.
///
/// Apply `propagate` before `set` so the id exists by the time it is propagated.
#[must_use]
pub fn request_id_layers() -> (SetRequestIdLayer<UuidRequestIdGenerator>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestIdGenerator),
        PropagateRequestIdLayer::new(X_REQUEST_ID.clone()),
    )
}

type MakeSpan = fn(&Request<Body>) -> Span;

/// Opens a `debug` span per request carrying method, path and request id.
#[must_use]
pub fn trace_layer() -> TraceLayer<HttpMakeClassifier, MakeSpan> {
    TraceLayer::new_for_http().make_span_with(request_span as MakeSpan)
}

fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::debug_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    async fn simple_handler() -> &'static str {
        "ok"
    }

    fn create_test_app() -> Router {
        let (set_layer, propagate_layer) = request_id_layers();
        Router::new()
            .route("/test", get(simple_handler))
            .layer(trace_layer())
            .layer(propagate_layer)
            .layer(set_layer)
    }

    #[tokio::test]
    async fn test_generates_request_id_when_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = create_test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let id = response
            .headers()
            .get(&X_REQUEST_ID)
            .expect("Should have request id")
            .to_str()
            .unwrap();
        assert!(Uuid::parse_str(id).is_ok(), "Generated ID should be valid UUID, got: {id}");
    }

    #[tokio::test]
    async fn test_preserves_existing_request_id() {
        let request = Request::builder()
            .uri("/test")
            .header(X_REQUEST_ID.clone(), "client-id-123")
            .body(Body::empty())
            .unwrap();
        let response = create_test_app().oneshot(request).await.unwrap();

        let id = response.headers().get(&X_REQUEST_ID).unwrap().to_str().unwrap();
        assert_eq!(id, "client-id-123");
    }
}
