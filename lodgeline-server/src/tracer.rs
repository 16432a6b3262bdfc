use axum::{body::Body, http::Request};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, DefaultOnResponse, MakeSpan, TraceLayer};
use tracing::{Level, Span, debug, error};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span),
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

/// Opens one `http_request` span per request, tagged with the request id.
///
/// `principal_id` starts empty and is recorded once the identity header has
/// been resolved.
#[derive(Clone, Debug, Default)]
pub(crate) struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(|| "n/a".to_string(), |ctx| ctx.request_id.clone());

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            principal_id = tracing::field::Empty,
        )
    }
}

fn on_request(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        debug!(
            method = %req.method(),
            uri = %req.uri(),
            version = ?req.version(),
            "request received"
        );
    });
}

fn on_failure(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(error = %error, latency_ms = latency.as_millis(), "request failed");
    });
}

pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request as fn(&Request<Body>, &Span))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(on_failure as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn span_is_named_http_request() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .set_default();
        let mut request = Request::builder()
            .uri("/api/conversations/5?x=1")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-7".into(),
            principal: None,
        });

        let span = HttpMakeSpan.make_span(&request);
        let metadata = span.metadata().unwrap();
        assert_eq!(metadata.name(), "http_request");
        assert!(metadata.fields().field("principal_id").is_some());

        on_request(&request, &span);
    }

    #[test]
    fn create_trace_layer_builds() {
        let layer = create_trace_layer();
        assert!(std::mem::size_of_val(&layer) > 0);
    }
}
