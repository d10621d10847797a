//! Activation history repository — append-only.

use chrono::{DateTime, Utc};
use sigil_common::models::activation::ActivationStatus;
use sigil_common::models::history::ActivationHistoryEntry;
use uuid::Uuid;

use crate::fmt_ts;

/// Append one state-transition event. Runs on the caller's executor so the
/// history row is durable in the same transaction as the transition itself.
pub async fn append<'e, E>(
    executor: E,
    activation_id: Uuid,
    status: ActivationStatus,
    event_reason: Option<&str>,
    external_user_id: Option<&str>,
    timestamp: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
        INSERT INTO pa_activation_history
            (activation_id, activation_status, event_reason, external_user_id, timestamp)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(activation_id.to_string())
    .bind(status.as_str())
    .bind(event_reason)
    .bind(external_user_id)
    .bind(fmt_ts(timestamp))
    .execute(executor)
    .await?;
    Ok(())
}

/// Events for one activation within a time range, in append order.
pub async fn list_by_activation(
    pool: &sqlx::AnyPool,
    activation_id: Uuid,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<ActivationHistoryEntry>, sqlx::Error> {
    let mut sql = String::from("SELECT * FROM pa_activation_history WHERE activation_id = ?");
    if from.is_some() {
        sql.push_str(" AND timestamp >= ?");
    }
    if to.is_some() {
        sql.push_str(" AND timestamp <= ?");
    }
    sql.push_str(" ORDER BY id ASC");

    let mut query = sqlx::query_as::<_, ActivationHistoryEntry>(&sql);
    query = query.bind(activation_id.to_string());
    if let Some(from) = from {
        query = query.bind(fmt_ts(from));
    }
    if let Some(to) = to {
        query = query.bind(fmt_ts(to));
    }
    query.fetch_all(pool).await
}
