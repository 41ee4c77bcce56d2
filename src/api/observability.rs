use crate::api::AppState;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.prometheus_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics exporter is disabled").into_response(),
    }
}

/// How a finished request is reported in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ok,
    Rejected,
    Unauthenticated,
    Forbidden,
    Failed,
}

impl Outcome {
    fn classify(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthenticated,
            StatusCode::FORBIDDEN => Self::Forbidden,
            s if s.is_server_error() => Self::Failed,
            s if s.is_client_error() => Self::Rejected,
            _ => Self::Ok,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Rejected => "rejected",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::Failed => "failed",
        }
    }

    const fn is_denial(self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Forbidden)
    }
}

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wraps each API request in a span that the login guard fills with `user_id`.
///
/// Requests without a session cookie are tagged so anonymous traffic can be
/// told apart from expired sessions when a 401 comes back.
pub async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let method = req.method().clone();

    // Unmatched paths collapse into one label.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let has_session = req
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .any(|pair| pair.trim_start().starts_with("id="));

    let span = info_span!(
        "api_request",
        %request_id,
        %method,
        route = %route,
        has_session,
        user_id = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    async move {
        let mut response = next.run(req).await;

        let status = response.status();
        let outcome = Outcome::classify(status);
        let elapsed = start.elapsed();
        Span::current().record("outcome", outcome.as_str());

        let labels = [
            ("method", method.to_string()),
            ("route", route.clone()),
            ("outcome", outcome.as_str().to_string()),
        ];
        metrics::counter!("api_requests_total", &labels).increment(1);
        metrics::histogram!("api_request_duration_seconds", &labels)
            .record(elapsed.as_secs_f64());

        if outcome.is_denial() {
            metrics::counter!(
                "auth_denials_total",
                "route" => route.clone(),
                "reason" => outcome.as_str(),
            )
            .increment(1);
        }

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Outcome::Failed => error!(status = status.as_u16(), elapsed_ms, "Request failed"),
            Outcome::Unauthenticated | Outcome::Forbidden => {
                warn!(status = status.as_u16(), elapsed_ms, "Request denied");
            }
            Outcome::Ok | Outcome::Rejected => {
                info!(status = status.as_u16(), elapsed_ms, "Request finished");
            }
        }

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }
    .instrument(span)
    .await
}

const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    ("cache-control", "no-store"),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
];

/// Session cookies and CSRF tokens travel in these responses, so nothing is
/// cached or framed.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt;

    #[test]
    fn test_auth_failures_are_classified_as_denials() {
        assert_eq!(
            Outcome::classify(StatusCode::UNAUTHORIZED),
            Outcome::Unauthenticated
        );
        assert_eq!(Outcome::classify(StatusCode::FORBIDDEN), Outcome::Forbidden);
        assert!(Outcome::classify(StatusCode::FORBIDDEN).is_denial());

        assert_eq!(Outcome::classify(StatusCode::CONFLICT), Outcome::Rejected);
        assert!(!Outcome::classify(StatusCode::CONFLICT).is_denial());
        assert_eq!(
            Outcome::classify(StatusCode::SERVICE_UNAVAILABLE),
            Outcome::Failed
        );
        assert_eq!(Outcome::classify(StatusCode::SEE_OTHER), Outcome::Ok);
    }

    #[tokio::test]
    async fn test_responses_carry_request_id_and_security_headers() {
        let app = Router::new()
            .route("/denied", get(|| async { StatusCode::FORBIDDEN }))
            .layer(middleware::from_fn(logging_middleware))
            .layer(middleware::from_fn(security_headers_middleware));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(request_id).is_ok());
        for (name, value) in SECURITY_HEADERS {
            assert_eq!(response.headers()[name], value);
        }
    }
}
