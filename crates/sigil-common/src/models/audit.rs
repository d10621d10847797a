//! Signature audit log model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a signature verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Ok,
    Failed,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One row of the append-only `pa_signature_audit` table.
///
/// Written in the same transaction as the counter update, so the log order
/// agrees with the committed counter order. `data_fingerprint` is the hex
/// SHA-256 of the signed data — enough for correlation without retaining the
/// payload itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAuditEntry {
    pub id: i64,
    pub activation_id: Uuid,
    pub application_id: Uuid,
    pub user_id: String,
    pub signature_type: String,
    pub signature_version: i64,
    pub data_fingerprint: String,
    pub result: AuditResult,
    pub note: Option<String>,
    /// Counter value the attempt was evaluated against (pre-advance).
    pub counter: i64,
    /// v3 hash-chain counter snapshot at evaluation time.
    pub ctr_data: Option<String>,
    pub timestamp: DateTime<Utc>,
}
