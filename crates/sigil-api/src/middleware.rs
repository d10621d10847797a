//! Middleware — HTTP Basic gating for server-to-server callers.
//!
//! When `restrict_access` is on, every request must present credentials
//! matching a row in `pa_integration`. The check is read-only; managing the
//! table is someone else's job.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use sigil_common::error::SigilError;
use sigil_db::repository::applications;
use subtle::ConstantTimeEq;

use crate::AppState;

/// Validate `Authorization: Basic <token:secret>` against the integration
/// table. A no-op unless access restriction is enabled.
pub async fn integration_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, SigilError> {
    if !state.services.config.security.restrict_access {
        return Ok(next.run(request).await);
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(SigilError::Unauthorized)?;
    let encoded = header_value
        .strip_prefix("Basic ")
        .ok_or(SigilError::Unauthorized)?;
    let decoded = B64.decode(encoded).map_err(|_| SigilError::Unauthorized)?;
    let decoded = String::from_utf8(decoded).map_err(|_| SigilError::Unauthorized)?;
    let (token, secret) = decoded.split_once(':').ok_or(SigilError::Unauthorized)?;

    let integration =
        applications::find_integration_by_token(&state.services.db.pool, token)
            .await?
            .ok_or(SigilError::Unauthorized)?;

    let matches = integration.client_secret.len() == secret.len()
        && bool::from(
            integration
                .client_secret
                .as_bytes()
                .ct_eq(secret.as_bytes()),
        );
    if !matches {
        tracing::warn!(integration = %integration.name, "rejected integration credentials");
        return Err(SigilError::Unauthorized);
    }

    Ok(next.run(request).await)
}
