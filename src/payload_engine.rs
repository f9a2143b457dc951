//! Payload consumption + reorder engine. See `spec.md` §4.F.
//!
//! Wired onto the bus twice: once for `CounterDelta` (consumption and
//! edge-triggered reorder), once for the order-completion/failure
//! feedback that closes the replenishing cycle. The two subscriptions are
//! kept on the same struct because they share the `PayloadStore` but are
//! logically independent paths, matching the teacher's habit of one
//! engine type owning every bus hook for its component.

use std::sync::Arc;

use edge_types::{EdgeEvent, OrderStatus, OrderType, PayloadStatus, ReorderRequest};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::order_manager::OrderManager;
use crate::store::payloads::{PayloadStore, PayloadStoreError};

#[derive(Debug, thiserror::Error)]
pub enum PayloadEngineError {
    #[error(transparent)]
    Store(#[from] PayloadStoreError),
    #[error(transparent)]
    Order(#[from] crate::order_manager::OrderError),
}

pub struct PayloadEngine {
    store: Arc<dyn PayloadStore>,
    orders: Arc<OrderManager>,
    bus: Arc<EventBus>,
}

impl PayloadEngine {
    pub fn new(store: Arc<dyn PayloadStore>, orders: Arc<OrderManager>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { store, orders, bus })
    }

    /// Subscribe this engine's handlers onto the bus. Each handler spawns
    /// its async work rather than blocking the emitting task.
    pub fn install(self: &Arc<Self>) {
        let engine = self.clone();
        self.bus.subscribe(move |event| {
            if let EdgeEvent::CounterDelta { job_style_id, delta, new_count, .. } = event {
                let engine = engine.clone();
                let job_style_id = *job_style_id;
                let delta = *delta;
                let new_count = *new_count;
                tokio::spawn(async move {
                    if let Err(e) = engine.on_counter_delta(job_style_id, delta, new_count).await {
                        warn!(error = %e, job_style_id, "payload engine: counter delta handling failed");
                    }
                });
            }
        });

        let engine = self.clone();
        self.bus.subscribe(move |event| {
            // Only `OrderCompleted` carries the payload id; it's emitted
            // for every terminal status, including failed/cancelled.
            let reset = match event {
                EdgeEvent::OrderCompleted {
                    order_type: OrderType::Retrieve,
                    payload_id: Some(payload_id),
                    description,
                    final_status: OrderStatus::Confirmed,
                    ..
                } => Some((*payload_id, Some(description.clone()))),
                EdgeEvent::OrderCompleted {
                    order_type: OrderType::Retrieve,
                    payload_id: Some(payload_id),
                    final_status: OrderStatus::Failed | OrderStatus::Cancelled,
                    ..
                } => Some((*payload_id, None)),
                _ => None,
            };
            if let Some((payload_id, delivered_description)) = reset {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let result = match delivered_description {
                        Some(description) => engine.on_retrieve_delivered(payload_id, description).await,
                        None => engine.on_retrieve_failed(payload_id).await,
                    };
                    if let Err(e) = result {
                        warn!(error = %e, payload_id, "payload engine: completion handling failed");
                    }
                });
            }
        });
    }

    /// §4.F steps 1-3: debit every active/replenishing payload tied to
    /// `job_style_id`, then edge-trigger a reorder on threshold crossing.
    pub async fn on_counter_delta(
        &self,
        job_style_id: i64,
        delta: i64,
        _new_count: i64,
    ) -> Result<(), PayloadEngineError> {
        let payloads = self.store.list_active_for_style(job_style_id).await?;
        for payload in payloads {
            let new_remaining = (payload.remaining - delta).max(0);
            let crossed = payload.auto_reorder
                && payload.remaining > payload.reorder_point
                && payload.reorder_point >= new_remaining
                && payload.status != PayloadStatus::Replenishing;

            let new_status = if new_remaining == 0 {
                PayloadStatus::Empty
            } else if crossed {
                PayloadStatus::Replenishing
            } else {
                payload.status
            };

            self.store.persist_consumption(payload.id, new_remaining, new_status).await?;
            self.bus.emit(EdgeEvent::PayloadUpdated {
                payload_id: payload.id,
                remaining: new_remaining,
                status: new_status,
                at: chrono::Utc::now(),
            });

            if crossed {
                let request = ReorderRequest {
                    payload_id: payload.id,
                    location: payload.location.clone(),
                    staging_location: payload.staging_location.clone(),
                    description: payload.description.clone(),
                    reorder_qty: payload.reorder_qty,
                    retrieve_empty: payload.retrieve_empty,
                };
                self.bus.emit(EdgeEvent::PayloadReorder { request: request.clone(), at: chrono::Utc::now() });
                self.raise_reorder(request).await?;
            }
        }
        Ok(())
    }

    async fn raise_reorder(&self, request: ReorderRequest) -> Result<(), PayloadEngineError> {
        let order_uuid = Uuid::new_v4();
        self.orders
            .create_retrieve_order(
                order_uuid,
                Some(request.payload_id),
                request.retrieve_empty,
                request.reorder_qty,
                Some(request.location),
                request.staging_location,
                None,
                request.description,
                false,
            )
            .await?;
        info!(payload_id = request.payload_id, %order_uuid, "auto-reorder raised");
        Ok(())
    }

    /// §4.F's `OrderCompleted` path: the payload's retrieve order came
    /// back delivered and confirmed, so it's full again. `description` is
    /// the order's own description of what it carried, not the payload's
    /// static description field.
    async fn on_retrieve_delivered(&self, payload_id: i64, description: Option<String>) -> Result<(), PayloadEngineError> {
        let Some(payload) = self.store.get(payload_id).await? else {
            return Ok(());
        };
        self.store.reset_to_active(payload_id, description).await?;
        self.bus.emit(EdgeEvent::PayloadUpdated {
            payload_id,
            remaining: payload.capacity,
            status: PayloadStatus::Active,
            at: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Supplements `spec.md` §9's open question: a failed/cancelled
    /// retrieve order must not leave its payload stuck in `replenishing`
    /// forever. Resets status only, not the count — the operator
    /// reconciles actual remaining stock manually.
    /// Operator reorder-point edit, the one `F` mutation the HTTP surface
    /// reaches directly rather than through the bus.
    pub async fn update_reorder_settings(
        &self,
        payload_id: i64,
        reorder_point: i64,
        reorder_qty: f64,
        auto_reorder: bool,
    ) -> Result<(), PayloadEngineError> {
        self.store.update_reorder_settings(payload_id, reorder_point, reorder_qty, auto_reorder).await?;
        Ok(())
    }

    async fn on_retrieve_failed(&self, payload_id: i64) -> Result<(), PayloadEngineError> {
        let Some(payload) = self.store.get(payload_id).await? else {
            return Ok(());
        };
        if payload.status != PayloadStatus::Replenishing {
            return Ok(());
        }
        self.store
            .persist_consumption(payload_id, payload.remaining, PayloadStatus::Active)
            .await?;
        self.bus.emit(EdgeEvent::PayloadUpdated {
            payload_id,
            remaining: payload.remaining,
            status: PayloadStatus::Active,
            at: chrono::Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct FakePayloadStore {
        payloads: StdMutex<HashMap<i64, Payload>>,
    }

    use crate::store::payloads::Payload;

    impl FakePayloadStore {
        fn new(payloads: Vec<Payload>) -> Self {
            Self {
                payloads: StdMutex::new(payloads.into_iter().map(|p| (p.id, p)).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl PayloadStore for FakePayloadStore {
        async fn list_active_for_style(&self, job_style_id: i64) -> Result<Vec<Payload>, PayloadStoreError> {
            Ok(self
                .payloads
                .lock()
                .unwrap()
                .values()
                .filter(|p| {
                    p.job_style_id == job_style_id
                        && matches!(p.status, PayloadStatus::Active | PayloadStatus::Replenishing)
                })
                .cloned()
                .collect())
        }

        async fn persist_consumption(
            &self,
            id: i64,
            remaining: i64,
            status: PayloadStatus,
        ) -> Result<(), PayloadStoreError> {
            let mut guard = self.payloads.lock().unwrap();
            if let Some(p) = guard.get_mut(&id) {
                p.remaining = remaining;
                p.status = status;
            }
            Ok(())
        }

        async fn get(&self, id: i64) -> Result<Option<Payload>, PayloadStoreError> {
            Ok(self.payloads.lock().unwrap().get(&id).cloned())
        }

        async fn reset_to_active(&self, id: i64, description: Option<String>) -> Result<(), PayloadStoreError> {
            let mut guard = self.payloads.lock().unwrap();
            if let Some(p) = guard.get_mut(&id) {
                p.remaining = p.capacity;
                p.status = PayloadStatus::Active;
                p.has_description = description;
            }
            Ok(())
        }

        async fn update_reorder_settings(
            &self,
            id: i64,
            reorder_point: i64,
            reorder_qty: f64,
            auto_reorder: bool,
        ) -> Result<(), PayloadStoreError> {
            let mut guard = self.payloads.lock().unwrap();
            if let Some(p) = guard.get_mut(&id) {
                p.reorder_point = reorder_point;
                p.reorder_qty = reorder_qty;
                p.auto_reorder = auto_reorder;
            }
            Ok(())
        }
    }

    fn sample_payload() -> Payload {
        Payload {
            id: 1,
            job_style_id: 10,
            location: "A1".to_string(),
            staging_location: Some("STAGE1".to_string()),
            description: Some("widget".to_string()),
            manifest: serde_json::json!({}),
            unit_multiplier: 1.0,
            capacity: 30,
            remaining: 10,
            reorder_point: 5,
            reorder_qty: 20.0,
            retrieve_empty: false,
            status: PayloadStatus::Active,
            auto_reorder: true,
            has_description: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn only_consumption_math(remaining: i64, reorder_point: i64, delta: i64) -> (i64, bool) {
        let new_remaining = (remaining - delta).max(0);
        let crossed = remaining > reorder_point && reorder_point >= new_remaining;
        (new_remaining, crossed)
    }

    #[test]
    fn edge_trigger_fires_exactly_on_threshold_crossing() {
        // remaining=10, reorder_point=5, delta=6 -> new_remaining=4, crosses.
        let (new_remaining, crossed) = only_consumption_math(10, 5, 6);
        assert_eq!(new_remaining, 4);
        assert!(crossed);
    }

    #[test]
    fn no_trigger_when_still_above_reorder_point() {
        let (new_remaining, crossed) = only_consumption_math(10, 5, 2);
        assert_eq!(new_remaining, 8);
        assert!(!crossed);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let (new_remaining, _) = only_consumption_math(3, 5, 10);
        assert_eq!(new_remaining, 0);
    }

    #[tokio::test]
    async fn fake_store_rejects_double_reorder_while_replenishing() {
        let mut p = sample_payload();
        p.status = PayloadStatus::Replenishing;
        let store = FakePayloadStore::new(vec![p]);
        let payloads = store.list_active_for_style(10).await.unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].status, PayloadStatus::Replenishing);
    }
}
