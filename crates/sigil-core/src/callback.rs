//! Outbound state-change notifications.
//!
//! Every activation state transition fires one event, after the history row
//! for the transition is durable. Delivery machinery (HTTP targets, retry
//! budgets) lives outside this crate; the contract here is only the trait
//! and the at-least-once call site ordering.

use sigil_common::models::activation::ActivationStatus;
use uuid::Uuid;

/// One state-transition notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEvent {
    pub activation_id: Uuid,
    pub application_id: Uuid,
    pub status: ActivationStatus,
}

/// Sink for activation events. Implementations must not block the calling
/// task for long — hand off to a queue or log and return.
pub trait CallbackSink: Send + Sync {
    fn notify(&self, event: ActivationEvent);
}

/// Default sink: structured log lines only. Deployments wire a real
/// dispatcher in its place.
pub struct LoggingCallbackSink;

impl CallbackSink for LoggingCallbackSink {
    fn notify(&self, event: ActivationEvent) {
        tracing::info!(
            activation_id = %event.activation_id,
            application_id = %event.application_id,
            status = event.status.as_str(),
            "activation state changed"
        );
    }
}

/// Test sink that records every event in order.
pub struct RecordingCallbackSink {
    events: std::sync::Mutex<Vec<ActivationEvent>>,
}

impl RecordingCallbackSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<ActivationEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl Default for RecordingCallbackSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackSink for RecordingCallbackSink {
    fn notify(&self, event: ActivationEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}
