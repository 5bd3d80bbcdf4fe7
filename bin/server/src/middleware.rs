//! Activity logging.

use crate::error::ApiError;
use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{Instrument, info_span, trace, warn};

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Logs each request body at `trace` inside an `activity` span, then passes
/// the request on unchanged.
pub async fn log_activity(request: Request, next: Next) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.is::<LengthLimitError>() => {
            warn!(path = %parts.uri.path(), "request body too large");
            return Err(ApiError::payload_too_large(MAX_BODY_BYTES));
        }
        Err(err) => return Err(ApiError::bad_request(format!("unreadable request body: {err}"))),
    };

    let span = info_span!(
        "activity",
        bot = "skillgate",
        method = %parts.method,
        path = %parts.uri.path(),
    );
    if !bytes.is_empty() {
        span.in_scope(|| trace!(body = %String::from_utf8_lossy(&bytes), "request body"));
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).instrument(span).await)
}
