//! Activation domain models.
//!
//! An *activation* is the provisioned binding between one mobile device and
//! the server: a row in `pa_activation` holding the server-side half of the
//! key agreement plus the verification counter state. The record is the
//! aggregate root of the whole subsystem — every signature verification is a
//! read-modify-write of exactly one of these rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================
// Enums
// ============================================================

/// Lifecycle state of an activation.
///
/// Legal transitions:
/// ```text
/// (init) -> CREATED -> PENDING_COMMIT -> ACTIVE <-> BLOCKED
///              |              |            |          |
///              +---- expire --+            +- remove -+--> REMOVED
/// ```
/// `REMOVED` is terminal; key material is tombstoned on entry and never
/// reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    Created,
    PendingCommit,
    Active,
    Blocked,
    Removed,
}

impl ActivationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PendingCommit => "PENDING_COMMIT",
            Self::Active => "ACTIVE",
            Self::Blocked => "BLOCKED",
            Self::Removed => "REMOVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            // Historical name kept readable for rows written by older releases.
            "PENDING_COMMIT" | "OTP_USED" => Some(Self::PendingCommit),
            "ACTIVE" => Some(Self::Active),
            "BLOCKED" => Some(Self::Blocked),
            "REMOVED" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// When (if ever) the activation OTP is checked during provisioning.
/// Frozen at init; never changes for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpValidation {
    None,
    OnKeyExchange,
    OnCommit,
}

impl OtpValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::OnKeyExchange => "ON_KEY_EXCHANGE",
            Self::OnCommit => "ON_COMMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "ON_KEY_EXCHANGE" => Some(Self::OnKeyExchange),
            "ON_COMMIT" => Some(Self::OnCommit),
            _ => None,
        }
    }
}

/// How the server private key column is protected at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyEncryption {
    NoEncryption,
    AesHmac,
}

impl KeyEncryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEncryption => "NO_ENCRYPTION",
            Self::AesHmac => "AES_HMAC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NO_ENCRYPTION" => Some(Self::NoEncryption),
            "AES_HMAC" => Some(Self::AesHmac),
            _ => None,
        }
    }
}

/// Factor combination of a signature. Possession is always present; the
/// other two join in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Possession,
    PossessionKnowledge,
    PossessionBiometry,
    PossessionKnowledgeBiometry,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Possession => "possession",
            Self::PossessionKnowledge => "possession_knowledge",
            Self::PossessionBiometry => "possession_biometry",
            Self::PossessionKnowledgeBiometry => "possession_knowledge_biometry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "possession" => Some(Self::Possession),
            "possession_knowledge" => Some(Self::PossessionKnowledge),
            "possession_biometry" => Some(Self::PossessionBiometry),
            "possession_knowledge_biometry" => Some(Self::PossessionKnowledgeBiometry),
            _ => None,
        }
    }

    /// (possession, knowledge, biometry) — which factor keys participate.
    pub fn factors(&self) -> (bool, bool, bool) {
        match self {
            Self::Possession => (true, false, false),
            Self::PossessionKnowledge => (true, true, false),
            Self::PossessionBiometry => (true, false, true),
            Self::PossessionKnowledgeBiometry => (true, true, true),
        }
    }

    /// Number of 8-digit components in the produced signature string.
    pub fn component_count(&self) -> usize {
        let (p, k, b) = self.factors();
        p as usize + k as usize + b as usize
    }
}

/// Protocol generation, pinned at activation init and never changed. A v2
/// client may *compute* with v3 semantics mid-upgrade via the forced
/// signature version, but the record itself stays pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V2,
    V3,
}

impl ProtocolVersion {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }
}

// ============================================================
// Activation record (aggregate root)
// ============================================================

/// One row of `pa_activation`.
///
/// Key-material columns are `Option` because they are tombstoned (set to
/// NULL) when the record reaches `REMOVED`, and `device_public_key` is NULL
/// until key exchange completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub activation_id: Uuid,
    /// v3: full `XXXXX-XXXXX-XXXXX-XXXXX` code. Unique among records in
    /// CREATED / PENDING_COMMIT; reusable once the record is terminal.
    pub activation_code: Option<String>,
    /// v2 legacy short identifier (`XXXXX-XXXXX`).
    pub activation_id_short: Option<String>,
    pub application_id: Uuid,
    /// Opaque user identity — never interpreted, never mutated by clients.
    pub user_id: String,
    /// Master keypair in force when the activation was created. Snapshot;
    /// does not follow later rotations.
    pub master_keypair_id: Uuid,
    /// Server public key, Base64 of the uncompressed SEC1 point.
    pub server_public_key: Option<String>,
    /// Server private key, Base64 raw scalar or the AES_HMAC at-rest envelope.
    pub server_private_key: Option<String>,
    pub server_private_key_encryption: KeyEncryption,
    /// Device public key, Base64 SEC1. Set exactly once, during key exchange.
    pub device_public_key: Option<String>,
    /// Monotonic verification counter. Advances on every attempt, success or
    /// failure.
    pub counter: i64,
    /// v3 hash-chain counter, Base64 of 16 bytes. Advances with `counter`.
    pub ctr_data: Option<String>,
    pub failed_attempts: i64,
    pub max_failed_attempts: i64,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub activation_otp: Option<String>,
    pub activation_otp_validation: OtpValidation,
    pub protocol_version: ProtocolVersion,
    /// Opaque tags attached by integrators.
    pub activation_flags: Vec<String>,
    pub timestamp_created: DateTime<Utc>,
    pub timestamp_activation_expire: DateTime<Utc>,
    pub timestamp_last_used: DateTime<Utc>,
}

impl ActivationRecord {
    /// Whether this record still occupies its activation code (I5): codes are
    /// unique only across non-terminal, pre-commit records.
    pub fn holds_code(&self) -> bool {
        matches!(
            self.activation_status,
            ActivationStatus::Created | ActivationStatus::PendingCommit
        )
    }

    pub fn remaining_attempts(&self) -> i64 {
        (self.max_failed_attempts - self.failed_attempts).max(0)
    }
}
