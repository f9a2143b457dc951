//! Order lifecycle state machine. See `spec.md` §4.G.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use edge_types::envelope::{Envelope, MessageType, Party};
use edge_types::{EdgeEvent, OrderStatus, OrderType};
use edge_messaging::{enqueue_envelope, InboundMessage, OrderReplyKind, OutboxStore};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::store::orders::{NewOrder, Order, OrderStore, OrderStoreError};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("unknown order uuid {0}")]
    UnknownUuid(Uuid),
    #[error("unknown order id {0}")]
    UnknownId(i64),
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("order is already terminal")]
    AlreadyTerminal,
    #[error("store order needs count confirmation before submission")]
    NeedsConfirmation,
    #[error(transparent)]
    Store(#[from] OrderStoreError),
    #[error(transparent)]
    Outbox(#[from] edge_messaging::OutboxError),
    #[error("envelope encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `IsValidTransition(from, to)` per `spec.md` §4.G: the linear happy path
/// plus cancelled/failed reachable from any non-terminal state.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    if matches!(to, OrderStatus::Cancelled | OrderStatus::Failed) {
        return true;
    }
    matches!(
        (from, to),
        (OrderStatus::Pending, OrderStatus::Submitted)
            | (OrderStatus::Submitted, OrderStatus::Acknowledged)
            | (OrderStatus::Acknowledged, OrderStatus::InTransit)
            | (OrderStatus::InTransit, OrderStatus::Delivered)
            | (OrderStatus::Delivered, OrderStatus::Confirmed)
    )
}

#[derive(Serialize)]
struct OrderRequestPayload {
    order_uuid: Uuid,
    order_type: OrderType,
    payload_id: Option<i64>,
    retrieve_empty: bool,
    quantity: f64,
    delivery_node: Option<String>,
    pickup_node: Option<String>,
    staging_node: Option<String>,
    load_type: Option<String>,
}

#[derive(Serialize)]
struct CancelPayload {
    order_uuid: Uuid,
    detail: String,
}

#[derive(Serialize)]
struct RedirectPayload {
    order_uuid: Uuid,
    new_delivery: String,
}

#[derive(Serialize)]
struct StorageWaybillPayload {
    order_uuid: Uuid,
    quantity: f64,
    pickup_node: Option<String>,
}

#[derive(Serialize)]
struct ReceiptPayload {
    order_uuid: Uuid,
    final_count: f64,
}

pub struct OrderManager {
    store: Arc<dyn OrderStore>,
    outbox: Arc<dyn OutboxStore>,
    bus: Arc<EventBus>,
    self_party: Party,
    core_party: Party,
}

impl OrderManager {
    pub fn new(
        store: Arc<dyn OrderStore>,
        outbox: Arc<dyn OutboxStore>,
        bus: Arc<EventBus>,
        self_party: Party,
        core_party: Party,
    ) -> Arc<Self> {
        Arc::new(Self { store, outbox, bus, self_party, core_party })
    }

    async fn enqueue<P: Serialize>(&self, msg_type: MessageType, payload: P) -> Result<(), OrderError> {
        let ttl = msg_type.default_ttl();
        let envelope = Envelope::new(msg_type.clone(), self.self_party.clone(), self.core_party.clone(), ttl, None, payload);
        let bytes = envelope.to_bytes()?;
        enqueue_envelope(self.outbox.as_ref(), message_type_tag(&msg_type), bytes).await?;
        Ok(())
    }

    async fn get_or_err(&self, id: i64) -> Result<Order, OrderError> {
        self.store.get(id).await?.ok_or(OrderError::UnknownId(id))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_retrieve_order(
        &self,
        order_uuid: Uuid,
        payload_id: Option<i64>,
        retrieve_empty: bool,
        quantity: f64,
        delivery_node: Option<String>,
        staging_node: Option<String>,
        load_type: Option<String>,
        description: Option<String>,
        auto_confirm: bool,
    ) -> Result<Order, OrderError> {
        let new_order = NewOrder {
            uuid: order_uuid,
            order_type: OrderType::Retrieve,
            payload_id,
            retrieve_empty,
            quantity,
            delivery_node: delivery_node.clone(),
            pickup_node: None,
            staging_node: staging_node.clone(),
            load_type: load_type.clone(),
            description,
            auto_confirm,
            count_confirmed: true,
        };
        let order = self.store.create(new_order, OrderStatus::Pending).await?;

        self.enqueue(
            MessageType::OrderRequest,
            OrderRequestPayload {
                order_uuid,
                order_type: OrderType::Retrieve,
                payload_id,
                retrieve_empty,
                quantity,
                delivery_node,
                pickup_node: None,
                staging_node,
                load_type,
            },
        )
        .await?;

        self.bus.emit(EdgeEvent::OrderCreated {
            order_id: order.id,
            order_uuid,
            order_type: OrderType::Retrieve,
            at: Utc::now(),
        });
        Ok(order)
    }

    /// Store orders require an operator count confirmation before they can
    /// be submitted; no envelope is sent at creation.
    pub async fn create_store_order(
        &self,
        order_uuid: Uuid,
        payload_id: Option<i64>,
        quantity: f64,
        pickup_node: Option<String>,
    ) -> Result<Order, OrderError> {
        let new_order = NewOrder {
            uuid: order_uuid,
            order_type: OrderType::Store,
            payload_id,
            retrieve_empty: false,
            quantity,
            delivery_node: None,
            pickup_node,
            staging_node: None,
            load_type: None,
            description: None,
            auto_confirm: false,
            count_confirmed: false,
        };
        let order = self.store.create(new_order, OrderStatus::Pending).await?;
        self.bus.emit(EdgeEvent::OrderCreated {
            order_id: order.id,
            order_uuid,
            order_type: OrderType::Store,
            at: Utc::now(),
        });
        Ok(order)
    }

    pub async fn create_move_order(
        &self,
        order_uuid: Uuid,
        payload_id: Option<i64>,
        quantity: f64,
        pickup_node: Option<String>,
        delivery_node: Option<String>,
    ) -> Result<Order, OrderError> {
        let new_order = NewOrder {
            uuid: order_uuid,
            order_type: OrderType::Move,
            payload_id,
            retrieve_empty: false,
            quantity,
            delivery_node: delivery_node.clone(),
            pickup_node: pickup_node.clone(),
            staging_node: None,
            load_type: None,
            description: None,
            auto_confirm: false,
            count_confirmed: true,
        };
        let order = self.store.create(new_order, OrderStatus::Pending).await?;

        self.enqueue(
            MessageType::OrderRequest,
            OrderRequestPayload {
                order_uuid,
                order_type: OrderType::Move,
                payload_id,
                retrieve_empty: false,
                quantity,
                delivery_node,
                pickup_node,
                staging_node: None,
                load_type: None,
            },
        )
        .await?;

        self.bus.emit(EdgeEvent::OrderCreated {
            order_id: order.id,
            order_uuid,
            order_type: OrderType::Move,
            at: Utc::now(),
        });
        Ok(order)
    }

    pub async fn submit_order(&self, id: i64) -> Result<(), OrderError> {
        let order = self.get_or_err(id).await?;
        if !is_valid_transition(order.status, OrderStatus::Submitted) {
            return Err(OrderError::InvalidTransition { from: order.status, to: OrderStatus::Submitted });
        }
        if order.order_type == OrderType::Store && !order.count_confirmed {
            return Err(OrderError::NeedsConfirmation);
        }
        self.transition_order(id, OrderStatus::Submitted, None).await?;

        if order.order_type == OrderType::Store {
            self.enqueue(
                MessageType::OrderStorageWaybill,
                StorageWaybillPayload {
                    order_uuid: order.uuid,
                    quantity: order.quantity,
                    pickup_node: order.pickup_node.clone(),
                },
            )
            .await?;
        }
        Ok(())
    }

    pub async fn transition_order(
        &self,
        id: i64,
        new_status: OrderStatus,
        detail: Option<&str>,
    ) -> Result<(), OrderError> {
        let order = self.get_or_err(id).await?;
        if !is_valid_transition(order.status, new_status) {
            return Err(OrderError::InvalidTransition { from: order.status, to: new_status });
        }
        self.store.update_status(id, new_status, detail).await?;
        self.bus.emit(EdgeEvent::OrderStatusChanged {
            order_id: id,
            order_uuid: order.uuid,
            from: order.status,
            to: new_status,
            eta: order.eta,
            detail: detail.map(str::to_string),
            at: Utc::now(),
        });
        if new_status.is_terminal() {
            self.bus.emit(EdgeEvent::OrderCompleted {
                order_id: id,
                order_uuid: order.uuid,
                order_type: order.order_type,
                payload_id: order.payload_id,
                description: order.description.clone(),
                final_status: new_status,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    pub async fn abort_order(&self, id: i64) -> Result<(), OrderError> {
        let order = self.get_or_err(id).await?;
        if order.status.is_terminal() {
            return Err(OrderError::AlreadyTerminal);
        }
        self.transition_order(id, OrderStatus::Cancelled, Some("aborted by operator")).await?;
        self.enqueue(
            MessageType::OrderCancel,
            CancelPayload { order_uuid: order.uuid, detail: "aborted by operator".to_string() },
        )
        .await?;
        Ok(())
    }

    pub async fn redirect_order(&self, id: i64, new_delivery: String) -> Result<(), OrderError> {
        let order = self.get_or_err(id).await?;
        if order.status.is_terminal() {
            return Err(OrderError::AlreadyTerminal);
        }
        self.store.set_delivery_node(id, &new_delivery).await?;
        self.enqueue(
            MessageType::OrderRedirect,
            RedirectPayload { order_uuid: order.uuid, new_delivery },
        )
        .await?;
        Ok(())
    }

    pub async fn confirm_delivery(&self, id: i64, final_count: f64) -> Result<(), OrderError> {
        let order = self.get_or_err(id).await?;
        if order.status != OrderStatus::Delivered {
            return Err(OrderError::InvalidTransition { from: order.status, to: OrderStatus::Confirmed });
        }
        self.store.confirm_delivery(id, final_count).await?;
        self.enqueue(MessageType::OrderReceipt, ReceiptPayload { order_uuid: order.uuid, final_count }).await?;

        self.bus.emit(EdgeEvent::OrderStatusChanged {
            order_id: id,
            order_uuid: order.uuid,
            from: OrderStatus::Delivered,
            to: OrderStatus::Confirmed,
            eta: order.eta,
            detail: Some("delivery confirmed".to_string()),
            at: Utc::now(),
        });
        self.bus.emit(EdgeEvent::OrderCompleted {
            order_id: id,
            order_uuid: order.uuid,
            order_type: order.order_type,
            payload_id: order.payload_id,
            description: order.description.clone(),
            final_status: OrderStatus::Confirmed,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Confirm a store order's counted quantity, unblocking `submit_order`.
    pub async fn confirm_count(&self, id: i64) -> Result<(), OrderError> {
        self.store.set_count_confirmed(id).await?;
        Ok(())
    }

    /// §4.G's `HandleDispatchReply`: apply a decoded inbound message to
    /// local order state.
    pub async fn handle_dispatch_reply(&self, message: InboundMessage) -> Result<(), OrderError> {
        let InboundMessage::OrderReply { order_uuid, kind } = message else {
            return Ok(());
        };
        let order = self.store.get_by_uuid(order_uuid).await?.ok_or(OrderError::UnknownUuid(order_uuid))?;

        match kind {
            OrderReplyKind::Ack => {
                self.transition_order(order.id, OrderStatus::Acknowledged, None).await?;
            }
            OrderReplyKind::Waybill { waybill_id, eta } => {
                self.store.set_waybill_eta(order.id, Some(&waybill_id), eta).await?;
                self.transition_order(order.id, OrderStatus::InTransit, None).await?;
            }
            OrderReplyKind::Update { eta } => {
                if eta.is_some() {
                    self.store.set_waybill_eta(order.id, None, eta).await?;
                }
            }
            OrderReplyKind::Delivered => {
                self.transition_order(order.id, OrderStatus::Delivered, None).await?;
                if order.auto_confirm {
                    self.confirm_delivery(order.id, order.quantity).await?;
                }
            }
            OrderReplyKind::Error { detail } => {
                self.transition_order(order.id, OrderStatus::Failed, Some(&detail)).await?;
            }
            OrderReplyKind::Cancelled { detail } => {
                self.transition_order(order.id, OrderStatus::Cancelled, detail.as_deref()).await?;
            }
        }
        info!(%order_uuid, "applied dispatch reply");
        Ok(())
    }
}

fn message_type_tag(msg_type: &MessageType) -> &'static str {
    match msg_type {
        MessageType::OrderRequest => "order.request",
        MessageType::OrderCancel => "order.cancel",
        MessageType::OrderRedirect => "order.redirect",
        MessageType::OrderStorageWaybill => "order.storage_waybill",
        MessageType::OrderReceipt => "order.receipt",
        MessageType::OrderAck => "order.ack",
        MessageType::OrderWaybill => "order.waybill",
        MessageType::OrderUpdate => "order.update",
        MessageType::OrderDelivered => "order.delivered",
        MessageType::OrderError => "order.error",
        MessageType::OrderCancelled => "order.cancelled",
        MessageType::Data => "data",
        MessageType::Other => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_valid_in_order() {
        assert!(is_valid_transition(OrderStatus::Pending, OrderStatus::Submitted));
        assert!(is_valid_transition(OrderStatus::Submitted, OrderStatus::Acknowledged));
        assert!(is_valid_transition(OrderStatus::Acknowledged, OrderStatus::InTransit));
        assert!(is_valid_transition(OrderStatus::InTransit, OrderStatus::Delivered));
        assert!(is_valid_transition(OrderStatus::Delivered, OrderStatus::Confirmed));
    }

    #[test]
    fn cancelled_and_failed_reachable_from_any_non_terminal_state() {
        for from in [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::Acknowledged,
            OrderStatus::InTransit,
            OrderStatus::Delivered,
        ] {
            assert!(is_valid_transition(from, OrderStatus::Cancelled));
            assert!(is_valid_transition(from, OrderStatus::Failed));
        }
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        for from in [OrderStatus::Confirmed, OrderStatus::Cancelled, OrderStatus::Failed] {
            assert!(!is_valid_transition(from, OrderStatus::Submitted));
            assert!(!is_valid_transition(from, OrderStatus::Cancelled));
        }
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        assert!(!is_valid_transition(OrderStatus::Pending, OrderStatus::InTransit));
        assert!(!is_valid_transition(OrderStatus::Submitted, OrderStatus::Delivered));
    }
}
