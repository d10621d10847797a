//! Activation record repository.
//!
//! The activation row is the aggregate root: counter state, lifecycle status
//! and key material all live here, and every signature verification is an
//! atomic read-modify-write of one row. Mutators that participate in those
//! cycles are generic over the executor so they run inside the caller's
//! transaction; plain reads take the pool.

use chrono::{DateTime, Utc};
use sigil_common::models::activation::{ActivationRecord, ActivationStatus};
use uuid::Uuid;

use crate::fmt_ts;

/// Insert a freshly initialized record.
pub async fn create(
    pool: &sqlx::AnyPool,
    record: &ActivationRecord,
) -> Result<ActivationRecord, sqlx::Error> {
    sqlx::query_as::<_, ActivationRecord>(
        r#"
        INSERT INTO pa_activation
            (activation_id, activation_code, activation_id_short, application_id, user_id,
             master_keypair_id, server_public_key, server_private_key,
             server_private_key_encryption, device_public_key, counter, ctr_data,
             failed_attempts, max_failed_attempts, activation_status, blocked_reason,
             activation_otp, activation_otp_validation, protocol_version, activation_flags,
             timestamp_created, timestamp_activation_expire, timestamp_last_used)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(record.activation_id.to_string())
    .bind(record.activation_code.as_deref())
    .bind(record.activation_id_short.as_deref())
    .bind(record.application_id.to_string())
    .bind(record.user_id.as_str())
    .bind(record.master_keypair_id.to_string())
    .bind(record.server_public_key.as_deref())
    .bind(record.server_private_key.as_deref())
    .bind(record.server_private_key_encryption.as_str())
    .bind(record.device_public_key.as_deref())
    .bind(record.counter)
    .bind(record.ctr_data.as_deref())
    .bind(record.failed_attempts)
    .bind(record.max_failed_attempts)
    .bind(record.activation_status.as_str())
    .bind(record.blocked_reason.as_deref())
    .bind(record.activation_otp.as_deref())
    .bind(record.activation_otp_validation.as_str())
    .bind(record.protocol_version.as_i64())
    .bind(serde_json::to_string(&record.activation_flags).unwrap_or_else(|_| "[]".into()))
    .bind(fmt_ts(record.timestamp_created))
    .bind(fmt_ts(record.timestamp_activation_expire))
    .bind(fmt_ts(record.timestamp_last_used))
    .fetch_one(pool)
    .await
}

/// Find a record by activation ID.
pub async fn find<'e, E>(executor: E, activation_id: Uuid) -> Result<Option<ActivationRecord>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query_as::<_, ActivationRecord>("SELECT * FROM pa_activation WHERE activation_id = ?")
        .bind(activation_id.to_string())
        .fetch_optional(executor)
        .await
}

/// Find the non-terminal record currently holding a v3 activation code.
pub async fn find_by_code_pending(
    pool: &sqlx::AnyPool,
    application_id: Uuid,
    activation_code: &str,
) -> Result<Option<ActivationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ActivationRecord>(
        r#"
        SELECT * FROM pa_activation
        WHERE activation_code = ? AND application_id = ?
          AND activation_status IN ('CREATED', 'PENDING_COMMIT')
        "#,
    )
    .bind(activation_code)
    .bind(application_id.to_string())
    .fetch_optional(pool)
    .await
}

/// Find the non-terminal record for a v2 short identifier.
pub async fn find_by_short_id_pending(
    pool: &sqlx::AnyPool,
    application_id: Uuid,
    activation_id_short: &str,
) -> Result<Option<ActivationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ActivationRecord>(
        r#"
        SELECT * FROM pa_activation
        WHERE activation_id_short = ? AND application_id = ?
          AND activation_status IN ('CREATED', 'PENDING_COMMIT')
        "#,
    )
    .bind(activation_id_short)
    .bind(application_id.to_string())
    .fetch_optional(pool)
    .await
}

/// Whether a candidate code collides with a record that still holds it (I5).
pub async fn code_in_use(pool: &sqlx::AnyPool, code: &str) -> Result<bool, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct CountRow {
        n: i64,
    }
    let row = sqlx::query_as::<_, CountRow>(
        r#"
        SELECT COUNT(*) AS n FROM pa_activation
        WHERE (activation_code = ? OR activation_id_short = ?)
          AND activation_status IN ('CREATED', 'PENDING_COMMIT')
        "#,
    )
    .bind(code)
    .bind(code)
    .fetch_one(pool)
    .await?;
    Ok(row.n != 0)
}

/// Store the device public key as key exchange completes (CREATED →
/// PENDING_COMMIT). The device key column is write-once by contract.
pub async fn set_device_key<'e, E>(
    executor: E,
    activation_id: Uuid,
    device_public_key: &str,
    last_used: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
        UPDATE pa_activation
        SET device_public_key = ?,
            activation_status = 'PENDING_COMMIT',
            timestamp_last_used = ?
        WHERE activation_id = ?
        "#,
    )
    .bind(device_public_key)
    .bind(fmt_ts(last_used))
    .bind(activation_id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

/// Plain status transition (commit, block, unblock).
pub async fn update_status<'e, E>(
    executor: E,
    activation_id: Uuid,
    status: ActivationStatus,
    blocked_reason: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
        UPDATE pa_activation
        SET activation_status = ?, blocked_reason = ?
        WHERE activation_id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(blocked_reason)
    .bind(activation_id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

/// Reset the failure counter (unblock).
pub async fn reset_failed_attempts<'e, E>(
    executor: E,
    activation_id: Uuid,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query("UPDATE pa_activation SET failed_attempts = 0 WHERE activation_id = ?")
        .bind(activation_id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Record a failed OTP attempt. The caller computes the new count from the
/// record it holds under the activation lock.
pub async fn increment_failed_attempts<'e, E>(
    executor: E,
    activation_id: Uuid,
    failed_attempts: i64,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query("UPDATE pa_activation SET failed_attempts = ? WHERE activation_id = ?")
        .bind(failed_attempts)
        .bind(activation_id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Rotate the activation OTP (pre-commit only; guarded by the service).
pub async fn update_otp<'e, E>(
    executor: E,
    activation_id: Uuid,
    activation_otp: &str,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query("UPDATE pa_activation SET activation_otp = ? WHERE activation_id = ?")
        .bind(activation_otp)
        .bind(activation_id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Commit the outcome of one verification attempt: counter advance, failure
/// bookkeeping, and — when the lockout bound was hit — the BLOCKED status,
/// all in one statement.
#[allow(clippy::too_many_arguments)]
pub async fn update_verification_state<'e, E>(
    executor: E,
    activation_id: Uuid,
    counter: i64,
    ctr_data: Option<&str>,
    failed_attempts: i64,
    status: ActivationStatus,
    blocked_reason: Option<&str>,
    last_used: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
        UPDATE pa_activation
        SET counter = ?,
            ctr_data = ?,
            failed_attempts = ?,
            activation_status = ?,
            blocked_reason = ?,
            timestamp_last_used = ?
        WHERE activation_id = ?
        "#,
    )
    .bind(counter)
    .bind(ctr_data)
    .bind(failed_attempts)
    .bind(status.as_str())
    .bind(blocked_reason)
    .bind(fmt_ts(last_used))
    .bind(activation_id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

/// Terminal removal: tombstone all key material and release the code (I6).
pub async fn tombstone<'e, E>(executor: E, activation_id: Uuid) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
        UPDATE pa_activation
        SET activation_status = 'REMOVED',
            server_public_key = NULL,
            server_private_key = NULL,
            device_public_key = NULL,
            activation_code = NULL,
            activation_id_short = NULL,
            activation_otp = NULL
        WHERE activation_id = ?
        "#,
    )
    .bind(activation_id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

/// All activations of a user, optionally narrowed to one application.
pub async fn list_by_user(
    pool: &sqlx::AnyPool,
    user_id: &str,
    application_id: Option<Uuid>,
) -> Result<Vec<ActivationRecord>, sqlx::Error> {
    match application_id {
        Some(app) => {
            sqlx::query_as::<_, ActivationRecord>(
                r#"
                SELECT * FROM pa_activation
                WHERE user_id = ? AND application_id = ?
                ORDER BY timestamp_created DESC
                "#,
            )
            .bind(user_id)
            .bind(app.to_string())
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, ActivationRecord>(
                "SELECT * FROM pa_activation WHERE user_id = ? ORDER BY timestamp_created DESC",
            )
            .bind(user_id)
            .fetch_all(pool)
            .await
        }
    }
}

/// Multi-criteria lookup used by back-office integrations. All filters are
/// optional and conjunctive; an empty filter set lists nothing rather than
/// everything.
pub async fn lookup(
    pool: &sqlx::AnyPool,
    user_ids: &[String],
    application_ids: &[Uuid],
    statuses: &[ActivationStatus],
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
) -> Result<Vec<ActivationRecord>, sqlx::Error> {
    if user_ids.is_empty()
        && application_ids.is_empty()
        && statuses.is_empty()
        && created_after.is_none()
        && created_before.is_none()
    {
        return Ok(vec![]);
    }

    let mut sql = String::from("SELECT * FROM pa_activation WHERE 1=1");
    if !user_ids.is_empty() {
        sql.push_str(&format!(
            " AND user_id IN ({})",
            vec!["?"; user_ids.len()].join(", ")
        ));
    }
    if !application_ids.is_empty() {
        sql.push_str(&format!(
            " AND application_id IN ({})",
            vec!["?"; application_ids.len()].join(", ")
        ));
    }
    if !statuses.is_empty() {
        sql.push_str(&format!(
            " AND activation_status IN ({})",
            vec!["?"; statuses.len()].join(", ")
        ));
    }
    if created_after.is_some() {
        sql.push_str(" AND timestamp_created >= ?");
    }
    if created_before.is_some() {
        sql.push_str(" AND timestamp_created <= ?");
    }
    sql.push_str(" ORDER BY timestamp_created DESC");

    let mut query = sqlx::query_as::<_, ActivationRecord>(&sql);
    for user_id in user_ids {
        query = query.bind(user_id.as_str());
    }
    for app in application_ids {
        query = query.bind(app.to_string());
    }
    for status in statuses {
        query = query.bind(status.as_str());
    }
    if let Some(after) = created_after {
        query = query.bind(fmt_ts(after));
    }
    if let Some(before) = created_before {
        query = query.bind(fmt_ts(before));
    }
    query.fetch_all(pool).await
}

/// Uncommitted records whose expiry has passed — sweep candidates.
pub async fn expired_pending(
    pool: &sqlx::AnyPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ActivationRecord>, sqlx::Error> {
    sqlx::query_as::<_, ActivationRecord>(
        r#"
        SELECT * FROM pa_activation
        WHERE activation_status IN ('CREATED', 'PENDING_COMMIT')
          AND timestamp_activation_expire < ?
        ORDER BY timestamp_activation_expire ASC
        LIMIT ?
        "#,
    )
    .bind(fmt_ts(now))
    .bind(limit)
    .fetch_all(pool)
    .await
}
