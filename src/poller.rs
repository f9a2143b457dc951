//! Reporting-point poller. See `spec.md` §4.E.
//!
//! Runs the same sleep/shutdown select loop as every other long-lived
//! task in this crate, walking the enabled reporting points once per
//! tick and driving the counter-delta calculator and the bus.

use std::sync::Arc;

use edge_types::{AnomalyKind, EdgeEvent};
use plc_gateway::{GatewayClient, ReadError, TagValue};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::delta::{self, Anomaly};
use crate::store::reporting_points::{ReportingPointStore, ReportingPointStoreError};

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error(transparent)]
    Store(#[from] ReportingPointStoreError),
}

pub struct ReportingPointPoller {
    store: Arc<dyn ReportingPointStore>,
    gateway: Arc<GatewayClient>,
    bus: Arc<EventBus>,
    poll_rate: Duration,
    jump_threshold: i64,
}

impl ReportingPointPoller {
    pub fn new(
        store: Arc<dyn ReportingPointStore>,
        gateway: Arc<GatewayClient>,
        bus: Arc<EventBus>,
        poll_rate: Duration,
        jump_threshold: i64,
    ) -> Arc<Self> {
        Arc::new(Self { store, gateway, bus, poll_rate, jump_threshold })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "reporting point poll tick failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_rate) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), PollerError> {
        let points = self.store.list_enabled().await?;
        for point in points {
            if let Err(e) = self.poll_one(&point).await {
                warn!(error = %e, reporting_point_id = point.id, "reporting point tick failed");
            }
        }
        Ok(())
    }

    async fn poll_one(
        &self,
        point: &crate::store::reporting_points::ReportingPoint,
    ) -> Result<(), PollerError> {
        // Step 1-2: read + coerce. Missing tag or tag error is silently skipped.
        let raw = match self.gateway.read_tag(&point.plc, &point.tag) {
            Ok(value) => value,
            Err(ReadError::NotFound(_)) | Err(ReadError::TagError(_, _)) => return Ok(()),
        };
        let cur = match raw {
            TagValue::Int(v) => v,
            TagValue::Float(v) => v as i64,
            TagValue::Bool(_) | TagValue::Text(_) => return Ok(()),
        };

        // Step 3.
        self.bus.emit(EdgeEvent::CounterRead { reporting_point_id: point.id, value: cur, at: chrono::Utc::now() });

        // Step 4-5.
        let result = delta::delta(point.last_count, cur, self.jump_threshold);
        if result.delta == 0 && result.anomaly == Anomaly::None {
            return Ok(());
        }

        let anomaly_kind = match result.anomaly {
            Anomaly::None => None,
            Anomaly::Reset => Some(AnomalyKind::Reset),
            Anomaly::Jump => Some(AnomalyKind::Jump),
        };

        // Step 6.
        let operator_confirmed = result.anomaly != Anomaly::Jump;
        let snapshot_id = self
            .store
            .record_snapshot(point.id, cur, result.delta, anomaly_kind, operator_confirmed)
            .await?;

        // Step 7.
        self.store.update_last_count(point.id, cur).await?;

        // Step 8.
        if let Some(anomaly) = anomaly_kind {
            self.bus.emit(EdgeEvent::CounterAnomaly {
                reporting_point_id: point.id,
                snapshot_id,
                anomaly,
                at: chrono::Utc::now(),
            });
        }

        // Step 9.
        let job_style_id = match point.job_style_id {
            Some(id) => Some(id),
            None => match point.line_id {
                Some(line_id) => self.store.active_job_style_for_line(line_id).await?,
                None => None,
            },
        };
        let Some(job_style_id) = job_style_id else {
            debug!(reporting_point_id = point.id, "no resolvable job style, skipping delta propagation");
            return Ok(());
        };
        let Some(line_id) = point.line_id else {
            return Ok(());
        };

        // Step 10.
        if result.anomaly != Anomaly::Jump && result.delta > 0 {
            self.bus.emit(EdgeEvent::CounterDelta {
                line_id,
                job_style_id,
                delta: result.delta,
                new_count: cur,
                at: chrono::Utc::now(),
            });
        }
        Ok(())
    }
}

/// Operator confirm/dismiss actions on a pending jump snapshot.
pub async fn confirm_snapshot(
    store: &dyn ReportingPointStore,
    snapshot_id: i64,
) -> Result<(), ReportingPointStoreError> {
    store.confirm_snapshot(snapshot_id).await
}

pub async fn dismiss_snapshot(
    store: &dyn ReportingPointStore,
    snapshot_id: i64,
) -> Result<(), ReportingPointStoreError> {
    store.dismiss_snapshot(snapshot_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::store::reporting_points::ReportingPoint;

    struct FakeStore {
        points: Vec<ReportingPoint>,
        snapshots: StdMutex<Vec<(i64, i64, i64, Option<AnomalyKind>, bool)>>,
        last_counts: StdMutex<HashMap<i64, i64>>,
        line_styles: HashMap<i64, i64>,
    }

    #[async_trait::async_trait]
    impl ReportingPointStore for FakeStore {
        async fn list_enabled(&self) -> Result<Vec<ReportingPoint>, ReportingPointStoreError> {
            Ok(self.points.clone())
        }

        async fn active_job_style_for_line(&self, line_id: i64) -> Result<Option<i64>, ReportingPointStoreError> {
            Ok(self.line_styles.get(&line_id).copied())
        }

        async fn record_snapshot(
            &self,
            reporting_point_id: i64,
            count_value: i64,
            delta: i64,
            anomaly: Option<AnomalyKind>,
            operator_confirmed: bool,
        ) -> Result<i64, ReportingPointStoreError> {
            let mut guard = self.snapshots.lock().unwrap();
            guard.push((reporting_point_id, count_value, delta, anomaly, operator_confirmed));
            Ok(guard.len() as i64)
        }

        async fn update_last_count(&self, reporting_point_id: i64, last_count: i64) -> Result<(), ReportingPointStoreError> {
            self.last_counts.lock().unwrap().insert(reporting_point_id, last_count);
            Ok(())
        }

        async fn confirm_snapshot(&self, _snapshot_id: i64) -> Result<(), ReportingPointStoreError> {
            Ok(())
        }

        async fn dismiss_snapshot(&self, _snapshot_id: i64) -> Result<(), ReportingPointStoreError> {
            Ok(())
        }
    }

    fn sample_point() -> ReportingPoint {
        ReportingPoint {
            id: 1,
            plc: "plc1".to_string(),
            tag: "count".to_string(),
            job_style_id: Some(10),
            line_id: Some(1),
            last_count: 100,
            enabled: true,
            warlink_managed: false,
        }
    }

    #[tokio::test]
    async fn jump_anomaly_is_recorded_unconfirmed_and_does_not_propagate_delta() {
        let point = sample_point();
        let gateway_config = plc_gateway::GatewayConfig {
            host: "localhost".to_string(),
            port: 8080,
            poll_rate: Duration::from_secs(5),
            enabled: true,
            mode: plc_gateway::GatewayMode::Poll,
        };
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let gateway = Arc::new(GatewayClient::new(gateway_config, tx));
        gateway.cache().replace_tags(
            "plc1",
            HashMap::from([(
                "count".to_string(),
                plc_gateway::TagEntry { value: TagValue::Int(250), type_name: "int".to_string(), error: None },
            )]),
        );

        let store = Arc::new(FakeStore {
            points: vec![point.clone()],
            snapshots: StdMutex::new(Vec::new()),
            last_counts: StdMutex::new(HashMap::new()),
            line_styles: HashMap::new(),
        });
        let bus = Arc::new(EventBus::new());
        let poller = ReportingPointPoller::new(store.clone(), gateway, bus, Duration::from_secs(1), 50);

        poller.poll_one(&point).await.unwrap();

        let snapshots = store.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].3, Some(AnomalyKind::Jump));
        assert!(!snapshots[0].4);
    }
}
