//! Request middleware

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use genmedia_arena_common::metrics::RequestMetrics;

/// Record count and latency of every request, labelled by route template
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let metrics = RequestMetrics::start(&method, &endpoint);
    let response = next.run(request).await;
    metrics.finish(response.status().as_u16());

    response
}
