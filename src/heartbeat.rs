//! Registration, heartbeat, and production reporter. See `spec.md` §4.J.
//!
//! Three independent duties sharing one outbox handle: announce once on
//! start, heartbeat every 60s, and flush accumulated production counts
//! every 60s. Kept on one struct since they're all "data"-channel
//! envelopes addressed to the same destination.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use edge_messaging::{enqueue_envelope, OutboxStore};
use edge_types::envelope::{data_subject_ttl, produced_subjects, DataPayload, Envelope, MessageType, Party};
use edge_types::EdgeEvent;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Outbox(#[from] edge_messaging::OutboxError),
    #[error("envelope encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct RegisterPayload {
    station_id: String,
    hostname: String,
    version: String,
    line_ids: Vec<i64>,
}

#[derive(Serialize)]
struct HeartbeatPayload {
    station_id: String,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct ProductionReportPayload {
    station_id: String,
    counts: HashMap<String, i64>,
}

/// Maps a job style to the catalog ids production should be attributed to.
/// Supplied by the caller since the catalog-id set lives with job styles
/// (component C of the data model), not with this reporter.
pub trait JobStyleCatalog: Send + Sync {
    fn catalog_ids(&self, job_style_id: i64) -> Vec<String>;
}

pub struct HeartbeatReporter {
    outbox: Arc<dyn OutboxStore>,
    bus: Arc<EventBus>,
    catalog: Arc<dyn JobStyleCatalog>,
    station_id: String,
    hostname: String,
    version: String,
    line_ids: Vec<i64>,
    self_party: Party,
    core_party: Party,
    accumulator: StdMutex<HashMap<String, i64>>,
    started_at: Instant,
}

impl HeartbeatReporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        bus: Arc<EventBus>,
        catalog: Arc<dyn JobStyleCatalog>,
        station_id: String,
        hostname: String,
        version: String,
        line_ids: Vec<i64>,
        self_party: Party,
        core_party: Party,
    ) -> Arc<Self> {
        Arc::new(Self {
            outbox,
            bus,
            catalog,
            station_id,
            hostname,
            version,
            line_ids,
            self_party,
            core_party,
            accumulator: StdMutex::new(HashMap::new()),
            started_at: Instant::now(),
        })
    }

    /// Subscribes the production accumulator onto `CounterDelta`. Call once
    /// before `run`.
    pub fn install(self: &Arc<Self>) {
        let reporter = self.clone();
        self.bus.subscribe(move |event| {
            if let EdgeEvent::CounterDelta { job_style_id, delta, .. } = event {
                if *delta <= 0 {
                    return;
                }
                let catalog_ids = reporter.catalog.catalog_ids(*job_style_id);
                if catalog_ids.is_empty() {
                    return;
                }
                let mut guard = reporter.accumulator.lock().expect("accumulator lock poisoned");
                for catalog_id in catalog_ids {
                    *guard.entry(catalog_id).or_insert(0) += delta;
                }
            }
        });
    }

    async fn enqueue_data<P: Serialize>(&self, subject: &str, data: P) -> Result<(), HeartbeatError> {
        let payload = DataPayload { subject: subject.to_string(), data: serde_json::to_value(data)? };
        let envelope = Envelope::new(
            MessageType::Data,
            self.self_party.clone(),
            self.core_party.clone(),
            data_subject_ttl(subject),
            None,
            payload,
        );
        let bytes = envelope.to_bytes()?;
        enqueue_envelope(self.outbox.as_ref(), subject, bytes).await?;
        Ok(())
    }

    async fn register(&self) -> Result<(), HeartbeatError> {
        self.enqueue_data(
            produced_subjects::EDGE_REGISTER,
            RegisterPayload {
                station_id: self.station_id.clone(),
                hostname: self.hostname.clone(),
                version: self.version.clone(),
                line_ids: self.line_ids.clone(),
            },
        )
        .await
    }

    async fn heartbeat(&self) -> Result<(), HeartbeatError> {
        self.enqueue_data(
            produced_subjects::EDGE_HEARTBEAT,
            HeartbeatPayload { station_id: self.station_id.clone(), uptime_secs: self.started_at.elapsed().as_secs() },
        )
        .await
    }

    async fn flush_production(&self) -> Result<(), HeartbeatError> {
        let counts = {
            let mut guard = self.accumulator.lock().expect("accumulator lock poisoned");
            std::mem::take(&mut *guard)
        };
        if counts.is_empty() {
            return Ok(());
        }
        self.enqueue_data(
            produced_subjects::PRODUCTION_REPORT,
            ProductionReportPayload { station_id: self.station_id.clone(), counts },
        )
        .await
    }

    /// Registers once, then heartbeats and flushes production every 60s
    /// on the same tick until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.register().await {
            warn!(error = %e, "edge registration failed");
        } else {
            info!(station_id = %self.station_id, "edge registered");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if let Err(e) = self.heartbeat().await {
                warn!(error = %e, "heartbeat publish failed");
            }
            if let Err(e) = self.flush_production().await {
                warn!(error = %e, "production report flush failed");
            }
        }

        // Flush once more on the way out so a shutdown doesn't drop the
        // final partial accumulation window.
        if let Err(e) = self.flush_production().await {
            warn!(error = %e, "final production report flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use edge_messaging::{OutboxError, OutboxMessage};
    use std::sync::Mutex as StdMutex2;

    struct FakeOutbox {
        enqueued: StdMutex2<Vec<String>>,
    }

    #[async_trait]
    impl OutboxStore for FakeOutbox {
        async fn enqueue(&self, payload: Vec<u8>, msg_type: &str) -> Result<i64, OutboxError> {
            let _ = payload;
            self.enqueued.lock().unwrap().push(msg_type.to_string());
            Ok(1)
        }

        async fn list_pending(&self, _limit: i64) -> Result<Vec<OutboxMessage>, OutboxError> {
            Ok(Vec::new())
        }

        async fn mark_sent(&self, _id: i64, _sent_at: chrono::DateTime<Utc>) -> Result<(), OutboxError> {
            Ok(())
        }

        async fn increment_retry(&self, _id: i64) -> Result<(), OutboxError> {
            Ok(())
        }
    }

    struct FakeCatalog;
    impl JobStyleCatalog for FakeCatalog {
        fn catalog_ids(&self, job_style_id: i64) -> Vec<String> {
            if job_style_id == 10 {
                vec!["CAT-A".to_string()]
            } else {
                Vec::new()
            }
        }
    }

    fn party(role: &str) -> Party {
        Party { role: role.to_string(), station: "edge1".to_string(), factory: "f1".to_string() }
    }

    #[tokio::test]
    async fn negative_delta_is_ignored_by_accumulator() {
        let outbox = Arc::new(FakeOutbox { enqueued: StdMutex2::new(Vec::new()) });
        let bus = Arc::new(EventBus::new());
        let reporter = HeartbeatReporter::new(
            outbox,
            bus.clone(),
            Arc::new(FakeCatalog),
            "edge1".to_string(),
            "host1".to_string(),
            "0.1.0".to_string(),
            vec![1],
            party("edge"),
            party("core"),
        );
        reporter.install();
        bus.emit(EdgeEvent::CounterDelta { line_id: 1, job_style_id: 10, delta: -5, new_count: 100, at: Utc::now() });
        assert!(reporter.accumulator.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn style_with_no_catalog_ids_is_skipped() {
        let outbox = Arc::new(FakeOutbox { enqueued: StdMutex2::new(Vec::new()) });
        let bus = Arc::new(EventBus::new());
        let reporter = HeartbeatReporter::new(
            outbox,
            bus.clone(),
            Arc::new(FakeCatalog),
            "edge1".to_string(),
            "host1".to_string(),
            "0.1.0".to_string(),
            vec![1],
            party("edge"),
            party("core"),
        );
        reporter.install();
        bus.emit(EdgeEvent::CounterDelta { line_id: 1, job_style_id: 99, delta: 5, new_count: 100, at: Utc::now() });
        assert!(reporter.accumulator.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn positive_delta_accumulates_per_catalog_id() {
        let outbox = Arc::new(FakeOutbox { enqueued: StdMutex2::new(Vec::new()) });
        let bus = Arc::new(EventBus::new());
        let reporter = HeartbeatReporter::new(
            outbox,
            bus.clone(),
            Arc::new(FakeCatalog),
            "edge1".to_string(),
            "host1".to_string(),
            "0.1.0".to_string(),
            vec![1],
            party("edge"),
            party("core"),
        );
        reporter.install();
        bus.emit(EdgeEvent::CounterDelta { line_id: 1, job_style_id: 10, delta: 3, new_count: 100, at: Utc::now() });
        bus.emit(EdgeEvent::CounterDelta { line_id: 1, job_style_id: 10, delta: 2, new_count: 103, at: Utc::now() });
        assert_eq!(reporter.accumulator.lock().unwrap().get("CAT-A"), Some(&5));
    }
}
