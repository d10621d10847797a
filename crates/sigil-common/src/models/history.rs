//! Activation history model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::activation::ActivationStatus;

/// One row of the append-only `pa_activation_history` table.
///
/// Every state transition appends exactly one row, durably, before any
/// outbound callback fires for the transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationHistoryEntry {
    pub id: i64,
    pub activation_id: Uuid,
    pub activation_status: ActivationStatus,
    /// Short free-form tag, e.g. the block reason.
    pub event_reason: Option<String>,
    /// Identity of the admin or system actor that drove the transition,
    /// when one exists. Client-driven transitions leave this NULL.
    pub external_user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}
