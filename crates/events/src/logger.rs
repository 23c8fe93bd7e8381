//! Background subscriber that mirrors bus events into the tracing log.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::bus::{
    EventBus, PipelineEvent, EVENT_RUN_FAILED, EVENT_SCENE_DEGRADED, EVENT_SCENE_DROPPED,
};

/// Logs every [`PipelineEvent`] until cancelled.
pub struct EventLogger {
    bus: Arc<EventBus>,
}

impl EventLogger {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Run the logging loop until `cancel` fires or the bus is dropped.
    pub async fn run(self, cancel: CancellationToken) {
        let mut rx = self.bus.subscribe();
        drop(self.bus);
        tracing::debug!("Event logger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Event logger stopping");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event logger lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}

fn log_event(event: &PipelineEvent) {
    let payload = event.payload.to_string();
    match event.event_type.as_str() {
        EVENT_SCENE_DEGRADED | EVENT_SCENE_DROPPED | EVENT_RUN_FAILED => tracing::warn!(
            event_type = %event.event_type,
            job_id = event.job_id,
            script_id = event.script_id,
            scene_index = event.scene_index.map(|i| i as u64),
            %payload,
            "Pipeline event"
        ),
        _ => tracing::info!(
            event_type = %event.event_type,
            job_id = event.job_id,
            script_id = event.script_id,
            scene_index = event.scene_index.map(|i| i as u64),
            %payload,
            "Pipeline event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_on_cancel() {
        let bus = Arc::new(EventBus::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(EventLogger::new(Arc::clone(&bus)).run(cancel.clone()));

        bus.publish(PipelineEvent::new("run.started").with_job(1));
        cancel.cancel();
        handle.await.unwrap();
    }
}
