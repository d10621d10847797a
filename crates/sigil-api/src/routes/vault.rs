//! Vault unlock route.
//!
//! POST /rest/v3/vault/unlock — verify the inbound signature and, on
//! success, release the transport-encrypted vault key.

use axum::{Json, Router, extract::State, routing::post};
use serde::Serialize;
use sigil_common::error::SigilResult;
use sigil_common::models::activation::ActivationStatus;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::envelope::{RequestEnvelope, ResponseEnvelope, ok};
use crate::routes::signature::VerifyBody;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v3/vault/unlock", post(unlock))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VaultUnlockResponse {
    activation_id: Uuid,
    signature_valid: bool,
    activation_status: ActivationStatus,
    remaining_attempts: i64,
    user_id: String,
    encrypted_vault_encryption_key: Option<String>,
}

async fn unlock(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<VerifyBody>>,
) -> SigilResult<Json<ResponseEnvelope<VaultUnlockResponse>>> {
    let response = state
        .services
        .unlock_vault(body.request_object.into_core())
        .await?;
    Ok(ok(VaultUnlockResponse {
        activation_id: response.activation_id,
        signature_valid: response.signature_valid,
        activation_status: response.activation_status,
        remaining_attempts: response.remaining_attempts,
        user_id: response.user_id,
        encrypted_vault_encryption_key: response.encrypted_vault_encryption_key,
    }))
}
