use axum::{extract::Request, extract::State, middleware::Next, response::Response};

use crate::error::AppError;
use crate::AppState;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// Gate for the internal confirm-receipt channel and admin operations.
/// 503 when no key is configured, 401 on mismatch.
pub async fn require_internal_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.internal_api_key.as_deref() else {
        return Err(AppError::ConfigMissing(
            "INTERNAL_API_KEY is not configured".to_string(),
        ));
    };

    let provided = req
        .headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    if provided != Some(expected) {
        tracing::warn!("rejected request with missing or invalid internal key");
        return Err(AppError::Unauthorized("invalid internal key".to_string()));
    }

    Ok(next.run(req).await)
}
