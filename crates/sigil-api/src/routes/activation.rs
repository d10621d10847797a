//! Activation lifecycle routes.
//!
//! POST /rest/v3/activation/init        — mint a new activation + code
//! POST /rest/v3/activation/prepare     — v3 key exchange
//! POST /rest/v2/activation/prepare     — legacy key exchange
//! POST /rest/v3/activation/create      — server-initiated activation
//! POST /rest/v3/activation/commit      — PENDING_COMMIT → ACTIVE
//! POST /rest/v3/activation/status      — externally visible state
//! POST /rest/v3/activation/remove      — tombstone
//! POST /rest/v3/activation/block       — ACTIVE → BLOCKED
//! POST /rest/v3/activation/unblock     — BLOCKED → ACTIVE
//! POST /rest/v3/activation/otp/update  — pre-commit OTP rotation
//! POST /rest/v3/activation/list        — activations of one user
//! POST /rest/v3/activation/lookup      — multi-criteria search
//! POST /rest/v3/activation/history     — state-transition log

use axum::{Json, Router, extract::State, routing::post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigil_common::error::{SigilError, SigilResult};
use sigil_common::models::activation::{ActivationStatus, OtpValidation, ProtocolVersion};
use sigil_core::activation::{
    ActivationStatusResponse, CreateActivationRequest, InitActivationRequest, LookupFilters,
    PrepareActivationRequest, PrepareActivationV2Request,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::envelope::{RequestEnvelope, ResponseEnvelope, ok};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v3/activation/init", post(init))
        .route("/v3/activation/prepare", post(prepare))
        .route("/v2/activation/prepare", post(prepare_v2))
        .route("/v3/activation/create", post(create))
        .route("/v3/activation/commit", post(commit))
        .route("/v3/activation/status", post(status))
        .route("/v3/activation/remove", post(remove))
        .route("/v3/activation/block", post(block))
        .route("/v3/activation/unblock", post(unblock))
        .route("/v3/activation/otp/update", post(update_otp))
        .route("/v3/activation/list", post(list))
        .route("/v3/activation/lookup", post(lookup))
        .route("/v3/activation/history", post(history))
}

// ============================================================
// POST /v3/activation/init
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitBody {
    user_id: String,
    application_id: Uuid,
    /// 2 or 3; defaults to the current generation.
    protocol_version: Option<i64>,
    otp_validation: Option<OtpValidation>,
    activation_otp: Option<String>,
    max_failed_attempts: Option<i64>,
    timestamp_activation_expire: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    activation_id: Uuid,
    user_id: String,
    application_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation_id_short: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation_otp: Option<String>,
    activation_signature: String,
    timestamp_activation_expire: DateTime<Utc>,
}

async fn init(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<InitBody>>,
) -> SigilResult<Json<ResponseEnvelope<InitResponse>>> {
    let body = body.request_object;
    let protocol_version = match body.protocol_version {
        None => ProtocolVersion::V3,
        Some(v) => ProtocolVersion::from_i64(v).ok_or(SigilError::InvalidInput {
            message: "unknown protocol version".into(),
        })?,
    };
    let response = state
        .services
        .init_activation(InitActivationRequest {
            user_id: body.user_id,
            application_id: body.application_id,
            protocol_version,
            otp_validation: body.otp_validation.unwrap_or(OtpValidation::None),
            activation_otp: body.activation_otp,
            max_failed_attempts: body.max_failed_attempts,
            activation_expire: body.timestamp_activation_expire,
        })
        .await?;
    Ok(ok(InitResponse {
        activation_id: response.activation_id,
        user_id: response.user_id,
        application_id: response.application_id,
        activation_code: response.activation_code,
        activation_id_short: response.activation_id_short,
        activation_otp: response.activation_otp,
        activation_signature: response.activation_signature,
        timestamp_activation_expire: response.expires_at,
    }))
}

// ============================================================
// POST /v3/activation/prepare  +  /v2/activation/prepare
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareBody {
    activation_code: String,
    application_key: String,
    ephemeral_public_key: String,
    encrypted_data: String,
    mac: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareResponse {
    activation_id: Uuid,
    encrypted_data: String,
    mac: String,
}

async fn prepare(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<PrepareBody>>,
) -> SigilResult<Json<ResponseEnvelope<PrepareResponse>>> {
    let body = body.request_object;
    let response = state
        .services
        .prepare_activation(PrepareActivationRequest {
            activation_code: body.activation_code,
            application_key: body.application_key,
            ephemeral_public_key: body.ephemeral_public_key,
            encrypted_data: body.encrypted_data,
            mac: body.mac,
        })
        .await?;
    Ok(ok(PrepareResponse {
        activation_id: response.activation_id,
        encrypted_data: response.encrypted_data,
        mac: response.mac,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareV2Body {
    activation_id_short: String,
    application_key: String,
    activation_nonce: String,
    ephemeral_public_key: String,
    c_device_public_key: String,
    application_signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareV2Response {
    activation_id: Uuid,
    c_server_public_key: String,
    c_server_public_key_signature: String,
}

async fn prepare_v2(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<PrepareV2Body>>,
) -> SigilResult<Json<ResponseEnvelope<PrepareV2Response>>> {
    let body = body.request_object;
    let response = state
        .services
        .prepare_activation_v2(PrepareActivationV2Request {
            activation_id_short: body.activation_id_short,
            application_key: body.application_key,
            activation_nonce: body.activation_nonce,
            ephemeral_public_key: body.ephemeral_public_key,
            encrypted_device_public_key: body.c_device_public_key,
            application_signature: body.application_signature,
        })
        .await?;
    Ok(ok(PrepareV2Response {
        activation_id: response.activation_id,
        c_server_public_key: response.c_server_public_key,
        c_server_public_key_signature: response.c_server_public_key_signature,
    }))
}

// ============================================================
// POST /v3/activation/create
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    user_id: String,
    application_key: String,
    ephemeral_public_key: String,
    encrypted_data: String,
    mac: String,
    otp_validation: Option<OtpValidation>,
    activation_otp: Option<String>,
    max_failed_attempts: Option<i64>,
    timestamp_activation_expire: Option<DateTime<Utc>>,
}

async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<CreateBody>>,
) -> SigilResult<Json<ResponseEnvelope<PrepareResponse>>> {
    let body = body.request_object;
    let response = state
        .services
        .create_activation(CreateActivationRequest {
            user_id: body.user_id,
            application_key: body.application_key,
            ephemeral_public_key: body.ephemeral_public_key,
            encrypted_data: body.encrypted_data,
            mac: body.mac,
            otp_validation: body.otp_validation.unwrap_or(OtpValidation::None),
            activation_otp: body.activation_otp,
            max_failed_attempts: body.max_failed_attempts,
            activation_expire: body.timestamp_activation_expire,
        })
        .await?;
    Ok(ok(PrepareResponse {
        activation_id: response.activation_id,
        encrypted_data: response.encrypted_data,
        mac: response.mac,
    }))
}

// ============================================================
// POST /v3/activation/commit, /remove, /block, /unblock
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitBody {
    activation_id: Uuid,
    activation_otp: Option<String>,
    external_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    activation_id: Uuid,
    activated: bool,
}

async fn commit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<CommitBody>>,
) -> SigilResult<Json<ResponseEnvelope<CommitResponse>>> {
    let body = body.request_object;
    let response = state
        .services
        .commit_activation(
            body.activation_id,
            body.activation_otp.as_deref(),
            body.external_user_id.as_deref(),
        )
        .await?;
    Ok(ok(CommitResponse {
        activation_id: response.activation_id,
        activated: response.activated,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivationIdBody {
    activation_id: Uuid,
    external_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransitionResponse {
    activation_id: Uuid,
    activation_status: ActivationStatus,
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<ActivationIdBody>>,
) -> SigilResult<Json<ResponseEnvelope<TransitionResponse>>> {
    let body = body.request_object;
    state
        .services
        .remove_activation(body.activation_id, body.external_user_id.as_deref())
        .await?;
    Ok(ok(TransitionResponse {
        activation_id: body.activation_id,
        activation_status: ActivationStatus::Removed,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockBody {
    activation_id: Uuid,
    blocked_reason: Option<String>,
    external_user_id: Option<String>,
}

async fn block(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<BlockBody>>,
) -> SigilResult<Json<ResponseEnvelope<TransitionResponse>>> {
    let body = body.request_object;
    state
        .services
        .block_activation(
            body.activation_id,
            body.blocked_reason.as_deref(),
            body.external_user_id.as_deref(),
        )
        .await?;
    Ok(ok(TransitionResponse {
        activation_id: body.activation_id,
        activation_status: ActivationStatus::Blocked,
    }))
}

async fn unblock(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<ActivationIdBody>>,
) -> SigilResult<Json<ResponseEnvelope<TransitionResponse>>> {
    let body = body.request_object;
    state
        .services
        .unblock_activation(body.activation_id, body.external_user_id.as_deref())
        .await?;
    Ok(ok(TransitionResponse {
        activation_id: body.activation_id,
        activation_status: ActivationStatus::Active,
    }))
}

// ============================================================
// POST /v3/activation/status
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    activation_id: Uuid,
}

async fn status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<StatusBody>>,
) -> SigilResult<Json<ResponseEnvelope<ActivationStatusResponse>>> {
    let response = state
        .services
        .get_activation_status(body.request_object.activation_id)
        .await?;
    Ok(ok(response))
}

// ============================================================
// POST /v3/activation/otp/update
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateOtpBody {
    activation_id: Uuid,
    activation_otp: String,
    external_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateOtpResponse {
    activation_id: Uuid,
    updated: bool,
}

async fn update_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<UpdateOtpBody>>,
) -> SigilResult<Json<ResponseEnvelope<UpdateOtpResponse>>> {
    let body = body.request_object;
    state
        .services
        .update_activation_otp(
            body.activation_id,
            &body.activation_otp,
            body.external_user_id.as_deref(),
        )
        .await?;
    Ok(ok(UpdateOtpResponse {
        activation_id: body.activation_id,
        updated: true,
    }))
}

// ============================================================
// POST /v3/activation/list, /lookup, /history
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBody {
    user_id: String,
    application_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivationsResponse {
    activations: Vec<ActivationStatusResponse>,
}

async fn list(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<ListBody>>,
) -> SigilResult<Json<ResponseEnvelope<ActivationsResponse>>> {
    let body = body.request_object;
    let activations = state
        .services
        .list_activations(&body.user_id, body.application_id)
        .await?;
    Ok(ok(ActivationsResponse { activations }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupBody {
    #[serde(default)]
    user_ids: Vec<String>,
    #[serde(default)]
    application_ids: Vec<Uuid>,
    #[serde(default)]
    activation_statuses: Vec<ActivationStatus>,
    timestamp_created_after: Option<DateTime<Utc>>,
    timestamp_created_before: Option<DateTime<Utc>>,
}

async fn lookup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<LookupBody>>,
) -> SigilResult<Json<ResponseEnvelope<ActivationsResponse>>> {
    let body = body.request_object;
    let activations = state
        .services
        .lookup_activations(LookupFilters {
            user_ids: body.user_ids,
            application_ids: body.application_ids,
            statuses: body.activation_statuses,
            created_after: body.timestamp_created_after,
            created_before: body.timestamp_created_before,
        })
        .await?;
    Ok(ok(ActivationsResponse { activations }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryBody {
    activation_id: Uuid,
    timestamp_from: Option<DateTime<Utc>>,
    timestamp_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryItem {
    activation_id: Uuid,
    activation_status: ActivationStatus,
    event_reason: Option<String>,
    external_user_id: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    items: Vec<HistoryItem>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestEnvelope<HistoryBody>>,
) -> SigilResult<Json<ResponseEnvelope<HistoryResponse>>> {
    let body = body.request_object;
    let entries = state
        .services
        .activation_history(body.activation_id, body.timestamp_from, body.timestamp_to)
        .await?;
    let items = entries
        .into_iter()
        .map(|entry| HistoryItem {
            activation_id: entry.activation_id,
            activation_status: entry.activation_status,
            event_reason: entry.event_reason,
            external_user_id: entry.external_user_id,
            timestamp: entry.timestamp,
        })
        .collect();
    Ok(ok(HistoryResponse { items }))
}
