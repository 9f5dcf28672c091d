use crate::{error::AuditError, event_bus::bus::EventBus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{core::identifiers::OperationId, events::Event, events::SyncEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One line of the audit log. Carries identifiers and counts only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub operation_id: Option<OperationId>,
    pub event_type: String,
    pub recorded_at: DateTime<Utc>,
    pub event: SyncEvent,
}

impl AuditEntry {
    pub fn from_event(event: &SyncEvent) -> Self {
        Self {
            operation_id: event.operation_id().cloned(),
            event_type: event.event_type().to_string(),
            recorded_at: Utc::now(),
            event: event.clone(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Writes audit entries as structured events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&entry.event)?;
        info!(
            target: "audit",
            event_type = %entry.event_type,
            operation_id = entry.operation_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            payload = %payload,
            "audit"
        );
        Ok(())
    }
}

/// Subscribes to the bus and forwards every auditable event to each sink.
/// The task ends when the bus and all its publishers are gone.
pub fn spawn_audit_recorder(bus: &EventBus, sinks: Vec<Arc<dyn AuditSink>>) -> JoinHandle<()> {
    let (_subscription, mut events) = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if !event.is_auditable() {
                continue;
            }
            let entry = AuditEntry::from_event(&event);
            for sink in &sinks {
                if let Err(err) = sink.record(&entry).await {
                    warn!(event_type = %entry.event_type, error = %err, "Failed to record audit entry");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditSink for CollectingSink {
        async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
            self.entries.lock().push(entry.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn progress_ticks_are_not_audited() {
        let bus = EventBus::new();
        let sink = Arc::new(CollectingSink::default());
        let handle = spawn_audit_recorder(&bus, vec![sink.clone(), Arc::new(TracingAuditSink)]);

        let op = OperationId::from("op-1");
        bus.publish(SyncEvent::Progress {
            operation_id: op.clone(),
            progress: Default::default(),
            percentage: 0.0,
            timestamp: Utc::now(),
        });
        bus.publish(SyncEvent::CancellationRequested {
            operation_id: op.clone(),
            timestamp: Utc::now(),
        });
        drop(bus);
        handle.await.unwrap();

        let entries = sink.entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "sync.cancellation_requested");
        assert_eq!(entries[0].operation_id, Some(op));
    }
}
