//! Request-scoped correlation id, propagated into error responses (spec.md
//! §6). A tokio task-local carries the id across the handler's async call
//! tree without threading it through every function signature, the same way
//! `tracing`'s span context rides along a request.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

tokio::task_local! {
    static CORRELATION_ID: String;
}

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Reads `X-Correlation-Id` from the inbound request if the caller supplied
/// one (so a client-initiated trace survives), otherwise mints a new one.
/// Echoes it back on the response header and makes it available to
/// [`current`] for the duration of the request.
pub async fn propagate(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(new_correlation_id);

    let header_value = HeaderValue::from_str(&id).ok();
    let mut response = CORRELATION_ID.scope(id, next.run(request)).await;
    if let Some(value) = header_value {
        response.headers_mut().insert("X-Correlation-Id", value);
    }
    response
}

/// The current request's correlation id, if called from within [`propagate`]'s
/// scope. `None` outside of a request (e.g. background janitor tasks).
pub fn current() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_is_none_outside_a_request_scope() {
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn current_reads_back_the_scoped_id() {
        let id = "corr-test-123".to_string();
        let observed = CORRELATION_ID.scope(id.clone(), async { current() }).await;
        assert_eq!(observed, Some(id));
    }
}
