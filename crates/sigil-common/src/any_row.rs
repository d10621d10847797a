//! Manual `sqlx::FromRow<'_, sqlx::any::AnyRow>` implementations for all
//! sigil-common model types.
//!
//! `sqlx::AnyPool` only decodes primitive types natively (i64, f64, bool,
//! String, bytes).  UUID and DateTime columns must be decoded as `String` and
//! then parsed.  JSON/array columns are stored as JSON text.
//!
//! **Why manual instead of `#[derive(sqlx::FromRow)]`?**
//! The derive macro generates a *blanket* `impl<DB>` with trait bounds.  Rust's
//! coherence checker rejects a manual `impl<AnyRow>` alongside that blanket even
//! when the bounds are never satisfied for `Any`.  Removing the derive from the
//! struct and writing the one specific AnyRow impl sidesteps the conflict.

use chrono::{DateTime, Utc};
use sqlx::{Row, any::AnyRow};
use uuid::Uuid;

use crate::models::{
    activation::{
        ActivationRecord, ActivationStatus, KeyEncryption, OtpValidation, ProtocolVersion,
    },
    application::{Application, ApplicationVersion, Integration, MasterKeyPair},
    audit::{AuditResult, SignatureAuditEntry},
    history::ActivationHistoryEntry,
};

// ── Internal helpers ──────────────────────────────────────────────────────────

fn uuid(row: &AnyRow, col: &str) -> Result<Uuid, sqlx::Error> {
    let s: String = row.try_get(col)?;
    Uuid::parse_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
}

fn dt(row: &AnyRow, col: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let s: String = row.try_get(col)?;
    parse_dt(&s).map_err(sqlx::Error::Decode)
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error + Send + Sync + 'static>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Ok(d.with_timezone(&Utc));
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(d.and_utc());
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(d.and_utc());
    }
    Err(format!("cannot parse timestamp '{s}'").into())
}

fn bool_val(row: &AnyRow, col: &str) -> Result<bool, sqlx::Error> {
    let v: i64 = row.try_get(col)?;
    Ok(v != 0)
}

fn str_vec(row: &AnyRow, col: &str) -> Result<Vec<String>, sqlx::Error> {
    let s: String = row.try_get(col)?;
    if s.trim() == "[]" || s.is_empty() {
        return Ok(vec![]);
    }
    serde_json::from_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e) as _))
}

fn parse_enum<T>(row: &AnyRow, col: &str, f: impl Fn(&str) -> Option<T>) -> Result<T, sqlx::Error> {
    let s: String = row.try_get(col)?;
    f(&s).ok_or_else(|| sqlx::Error::Decode(format!("unknown enum variant: {s}").into()))
}

// ── ActivationRecord ──────────────────────────────────────────────────────────

impl sqlx::FromRow<'_, AnyRow> for ActivationRecord {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        let version: i64 = row.try_get("protocol_version")?;
        Ok(Self {
            activation_id: uuid(row, "activation_id")?,
            activation_code: row.try_get("activation_code")?,
            activation_id_short: row.try_get("activation_id_short")?,
            application_id: uuid(row, "application_id")?,
            user_id: row.try_get("user_id")?,
            master_keypair_id: uuid(row, "master_keypair_id")?,
            server_public_key: row.try_get("server_public_key")?,
            server_private_key: row.try_get("server_private_key")?,
            server_private_key_encryption: parse_enum(
                row,
                "server_private_key_encryption",
                KeyEncryption::parse,
            )?,
            device_public_key: row.try_get("device_public_key")?,
            counter: row.try_get("counter")?,
            ctr_data: row.try_get("ctr_data")?,
            failed_attempts: row.try_get("failed_attempts")?,
            max_failed_attempts: row.try_get("max_failed_attempts")?,
            activation_status: parse_enum(row, "activation_status", ActivationStatus::parse)?,
            blocked_reason: row.try_get("blocked_reason")?,
            activation_otp: row.try_get("activation_otp")?,
            activation_otp_validation: parse_enum(
                row,
                "activation_otp_validation",
                OtpValidation::parse,
            )?,
            protocol_version: ProtocolVersion::from_i64(version).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown protocol version: {version}").into())
            })?,
            activation_flags: str_vec(row, "activation_flags")?,
            timestamp_created: dt(row, "timestamp_created")?,
            timestamp_activation_expire: dt(row, "timestamp_activation_expire")?,
            timestamp_last_used: dt(row, "timestamp_last_used")?,
        })
    }
}

// ── Application / ApplicationVersion / MasterKeyPair / Integration ────────────

impl sqlx::FromRow<'_, AnyRow> for Application {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: uuid(row, "id")?,
            name: row.try_get("name")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

impl sqlx::FromRow<'_, AnyRow> for ApplicationVersion {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: uuid(row, "id")?,
            application_id: uuid(row, "application_id")?,
            name: row.try_get("name")?,
            application_key: row.try_get("application_key")?,
            application_secret: row.try_get("application_secret")?,
            supported: bool_val(row, "supported")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

impl sqlx::FromRow<'_, AnyRow> for MasterKeyPair {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: uuid(row, "id")?,
            application_id: uuid(row, "application_id")?,
            public_key: row.try_get("public_key")?,
            private_key: row.try_get("private_key")?,
            timestamp_created: dt(row, "timestamp_created")?,
        })
    }
}

impl sqlx::FromRow<'_, AnyRow> for Integration {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: uuid(row, "id")?,
            name: row.try_get("name")?,
            client_token: row.try_get("client_token")?,
            client_secret: row.try_get("client_secret")?,
            created_at: dt(row, "created_at")?,
        })
    }
}

// ── SignatureAuditEntry ───────────────────────────────────────────────────────

impl sqlx::FromRow<'_, AnyRow> for SignatureAuditEntry {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            activation_id: uuid(row, "activation_id")?,
            application_id: uuid(row, "application_id")?,
            user_id: row.try_get("user_id")?,
            signature_type: row.try_get("signature_type")?,
            signature_version: row.try_get("signature_version")?,
            data_fingerprint: row.try_get("data_fingerprint")?,
            result: parse_enum(row, "result", AuditResult::parse)?,
            note: row.try_get("note")?,
            counter: row.try_get("counter")?,
            ctr_data: row.try_get("ctr_data")?,
            timestamp: dt(row, "timestamp")?,
        })
    }
}

// ── ActivationHistoryEntry ────────────────────────────────────────────────────

impl sqlx::FromRow<'_, AnyRow> for ActivationHistoryEntry {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            activation_id: uuid(row, "activation_id")?,
            activation_status: parse_enum(row, "activation_status", ActivationStatus::parse)?,
            event_reason: row.try_get("event_reason")?,
            external_user_id: row.try_get("external_user_id")?,
            timestamp: dt(row, "timestamp")?,
        })
    }
}
