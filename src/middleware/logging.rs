//! Request logging middleware.
//!
//! Every request except `/health` runs inside an `oracle_request` span that
//! carries the route family and, for token routes, the token. Ground-truth
//! misses (404) are routine for callers asking ahead of the data and are
//! logged at DEBUG; other 4xx at INFO; 5xx at WARN.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, field, info, info_span, warn, Instrument};

/// Route family and token, from the first two path segments.
fn route_fields(path: &str) -> (&str, Option<&str>) {
    let mut segments = path.trim_start_matches('/').split('/');
    let route = segments.next().filter(|s| !s.is_empty()).unwrap_or("root");
    let token = match route {
        "gt" | "update" => segments.next().filter(|s| !s.is_empty()),
        _ => None,
    };
    (route, token)
}

pub async fn request_logging_simple(request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path == "/health" {
        return next.run(request).await;
    }

    let (route, token) = route_fields(&path);
    let token = token.map(str::to_lowercase).unwrap_or_else(|| "-".to_string());
    let span = info_span!(
        "oracle_request",
        method = %request.method(),
        route,
        token = %token,
        status = field::Empty,
        latency_ms = field::Empty,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency_ms);
    span.in_scope(|| match status {
        500..=u16::MAX => warn!(path = %path, "request failed"),
        404 if route == "gt" => debug!(path = %path, "no ground truth for key"),
        400..=499 => info!(path = %path, "request rejected"),
        _ => info!("request completed"),
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_fields() {
        assert_eq!(route_fields("/gt/ETHUSD/250/3"), ("gt", Some("ETHUSD")));
        assert_eq!(route_fields("/update/btcusd/bitcoin/usd"), ("update", Some("btcusd")));
        assert_eq!(route_fields("/update"), ("update", None));
        assert_eq!(route_fields("/losses/1/12345"), ("losses", None));
        assert_eq!(route_fields("/"), ("root", None));
    }
}
