//! Signature audit repository — append-only.

use chrono::{DateTime, Utc};
use sigil_common::models::audit::{AuditResult, SignatureAuditEntry};
use uuid::Uuid;

use crate::fmt_ts;

/// Append one verification attempt. Runs on the caller's executor so the
/// audit row commits atomically with the counter update it describes.
#[allow(clippy::too_many_arguments)]
pub async fn append<'e, E>(
    executor: E,
    activation_id: Uuid,
    application_id: Uuid,
    user_id: &str,
    signature_type: &str,
    signature_version: i64,
    data_fingerprint: &str,
    result: AuditResult,
    note: Option<&str>,
    counter: i64,
    ctr_data: Option<&str>,
    timestamp: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
        INSERT INTO pa_signature_audit
            (activation_id, application_id, user_id, signature_type, signature_version,
             data_fingerprint, result, note, counter, ctr_data, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(activation_id.to_string())
    .bind(application_id.to_string())
    .bind(user_id)
    .bind(signature_type)
    .bind(signature_version)
    .bind(data_fingerprint)
    .bind(result.as_str())
    .bind(note)
    .bind(counter)
    .bind(ctr_data)
    .bind(fmt_ts(timestamp))
    .execute(executor)
    .await?;
    Ok(())
}

/// Attempts for one activation in append order.
pub async fn list_by_activation(
    pool: &sqlx::AnyPool,
    activation_id: Uuid,
) -> Result<Vec<SignatureAuditEntry>, sqlx::Error> {
    sqlx::query_as::<_, SignatureAuditEntry>(
        "SELECT * FROM pa_signature_audit WHERE activation_id = ? ORDER BY id ASC",
    )
    .bind(activation_id.to_string())
    .fetch_all(pool)
    .await
}
