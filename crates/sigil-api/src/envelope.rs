//! JSON request/response envelopes — the transport contract.
//!
//! Requests: `{"requestObject": <T>}`. Responses: `{"status":"OK",
//! "responseObject": <T>}`. The error shape lives with
//! [`sigil_common::error::SigilError`].

use axum::Json;
use serde::{Deserialize, Serialize};

/// Inbound envelope.
#[derive(Debug, Deserialize)]
pub struct RequestEnvelope<T> {
    #[serde(rename = "requestObject")]
    pub request_object: T,
}

/// Outbound success envelope.
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope<T> {
    pub status: &'static str,
    #[serde(rename = "responseObject")]
    pub response_object: T,
}

/// Wrap a response object in the OK envelope.
pub fn ok<T: Serialize>(response_object: T) -> Json<ResponseEnvelope<T>> {
    Json(ResponseEnvelope {
        status: "OK",
        response_object,
    })
}
