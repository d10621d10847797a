//! Signature verification routes.
//!
//! POST /rest/v3/signature/verify       — multifactor signature + counter
//! POST /rest/v3/signature/ecdsa/verify — plain device ECDSA approval
//!
//! A negative verification is a 200 with `signatureValid=false`; only
//! malformed input or unknown identifiers produce the error envelope.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use sigil_common::error::SigilResult;
use sigil_common::models::activation::{ActivationStatus, SignatureType};
use sigil_core::signature::VerifySignatureRequest;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::envelope::{RequestEnvelope, ResponseEnvelope, ok};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v3/signature/verify", post(verify))
        .route("/v3/signature/ecdsa/verify", post(verify_ecdsa))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyBody {
    pub activation_id: Uuid,
    pub application_key: String,
    pub data: String,
    pub signature: String,
    pub signature_type: SignatureType,
    /// 2 or 3; defaults to the current generation.
    pub signature_version: Option<i64>,
    pub forced_signature_version: Option<i64>,
}

impl VerifyBody {
    pub(crate) fn into_core(self) -> VerifySignatureRequest {
        VerifySignatureRequest {
            activation_id: self.activation_id,
            application_key: self.application_key,
            data: self.data,
            signature: self.signature,
            signature_type: self.signature_type,
            signature_version: self.signature_version.unwrap_or(3),
            forced_signature_version: self.forced_signature_version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    activation_id: Uuid,
    signature_valid: bool,
    activation_status: ActivationStatus,
    remaining_attempts: i64,
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    application_id: Option<Uuid>,
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<VerifyBody>>,
) -> SigilResult<Json<ResponseEnvelope<VerifyResponse>>> {
    let response = state
        .services
        .verify_signature(body.request_object.into_core())
        .await?;
    Ok(ok(VerifyResponse {
        activation_id: response.activation_id,
        signature_valid: response.signature_valid,
        activation_status: response.activation_status,
        remaining_attempts: response.remaining_attempts,
        user_id: response.user_id,
        application_id: response.application_id,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EcdsaVerifyBody {
    activation_id: Uuid,
    /// Base64 of the signed data.
    data: String,
    /// Base64 DER signature.
    signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EcdsaVerifyResponse {
    signature_valid: bool,
}

async fn verify_ecdsa(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<EcdsaVerifyBody>>,
) -> SigilResult<Json<ResponseEnvelope<EcdsaVerifyResponse>>> {
    let body = body.request_object;
    let signature_valid = state
        .services
        .verify_ecdsa_signature(body.activation_id, &body.data, &body.signature)
        .await?;
    Ok(ok(EcdsaVerifyResponse { signature_valid }))
}
