//! Background expiration sweep.
//!
//! Uncommitted activations past their expiry become `REMOVED`. The lazy
//! checks in prepare/commit already catch records a client touches; the
//! sweep catches the ones nobody ever comes back for, so stale codes do not
//! linger claimable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sigil_db::repository::activations;
use tokio::task::JoinHandle;

use crate::Services;

/// Records removed per sweep pass; a busy backlog drains across passes.
const SWEEP_BATCH: i64 = 100;

/// One sweep pass. Returns how many records were removed.
pub async fn run_sweep_once(services: &Services) -> anyhow::Result<usize> {
    let now = Utc::now();
    let expired = activations::expired_pending(&services.db.pool, now, SWEEP_BATCH).await?;
    let mut removed = 0usize;

    for record in expired {
        let lock = services.activation_lock(record.activation_id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent commit may have won.
        let Some(current) = activations::find(&services.db.pool, record.activation_id).await?
        else {
            continue;
        };
        let still_pending = matches!(
            current.activation_status,
            sigil_common::models::activation::ActivationStatus::Created
                | sigil_common::models::activation::ActivationStatus::PendingCommit
        );
        if !still_pending || current.timestamp_activation_expire >= now {
            continue;
        }

        services.remove_record(&current, Some("expired"), None).await?;
        removed += 1;
    }

    if removed > 0 {
        tracing::info!(removed, "expiration sweep removed stale activations");
    }
    Ok(removed)
}

/// Spawn the periodic sweep task.
pub fn spawn_expiration_sweep(services: Arc<Services>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = run_sweep_once(&services).await {
                tracing::error!(%error, "expiration sweep failed");
            }
        }
    })
}
