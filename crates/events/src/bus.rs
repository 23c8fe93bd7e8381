//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the central publish/subscribe hub for [`PipelineEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyreel_core::types::DbId;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const EVENT_JOB_STATUS_CHANGED: &str = "job.status_changed";
pub const EVENT_SCRIPT_FEEDBACK: &str = "script.feedback";
pub const EVENT_SCRIPT_NARRATION: &str = "script.narration";
pub const EVENT_SCENE_COMPLETED: &str = "scene.completed";
pub const EVENT_SCENE_DEGRADED: &str = "scene.degraded";
pub const EVENT_SCENE_DROPPED: &str = "scene.dropped";
pub const EVENT_RUN_STARTED: &str = "run.started";
pub const EVENT_RUN_COMPLETED: &str = "run.completed";
pub const EVENT_RUN_FAILED: &str = "run.failed";

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Something that happened while producing a job.
///
/// Constructed via [`PipelineEvent::new`] and enriched with the builder
/// methods [`with_job`](PipelineEvent::with_job),
/// [`with_script`](PipelineEvent::with_script),
/// [`with_scene`](PipelineEvent::with_scene), and
/// [`with_payload`](PipelineEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dot-separated event name, e.g. `"run.completed"`.
    pub event_type: String,

    pub job_id: Option<DbId>,

    pub script_id: Option<DbId>,

    /// 0-based scene index for scene events.
    pub scene_index: Option<usize>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: None,
            script_id: None,
            scene_index: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: DbId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_script(mut self, script_id: DbId) -> Self {
        self.script_id = Some(script_id);
        self
    }

    pub fn with_scene(mut self, index: usize) -> Self {
        self.scene_index = Some(index);
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use storyreel_events::bus::{EventBus, PipelineEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(PipelineEvent::new("run.started"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is dropped.
    pub fn publish(&self, event: PipelineEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let event = PipelineEvent::new(EVENT_SCENE_DEGRADED)
            .with_job(3)
            .with_script(9)
            .with_scene(2)
            .with_payload(serde_json::json!({"placeholder": "color:black"}));

        bus.publish(event);

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "scene.degraded");
        assert_eq!(received.job_id, Some(3));
        assert_eq!(received.script_id, Some(9));
        assert_eq!(received.scene_index, Some(2));
        assert_eq!(received.payload["placeholder"], "color:black");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(PipelineEvent::new(EVENT_RUN_STARTED));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.event_type, EVENT_RUN_STARTED);
        assert_eq!(e2.event_type, EVENT_RUN_STARTED);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(PipelineEvent::new("orphan.event"));
    }

    #[test]
    fn default_event_has_empty_optional_fields() {
        let event = PipelineEvent::new("bare.event");
        assert!(event.job_id.is_none());
        assert!(event.scene_index.is_none());
        assert!(event.payload.is_object());
    }
}
