//! The closed set of events carried by the in-process event bus.
//!
//! Every variant is a value type; handlers match on the tag rather than
//! on any open-world trait object. See `station_edge::bus` for the
//! dispatcher that moves these between components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Counter anomaly detected by the delta calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Reset,
    Jump,
}

/// Order lifecycle status. See `spec.md` §4.G for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Acknowledged,
    InTransit,
    Delivered,
    Confirmed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Retrieve,
    Move,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    Active,
    Replenishing,
    Empty,
    Hold,
}

/// One step of the changeover cycle. `NextState::next` walks this ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeoverState {
    Running,
    Stopping,
    CountingOut,
    Storing,
    Delivering,
    CountingIn,
    Ready,
}

const CHANGEOVER_CYCLE: [ChangeoverState; 7] = [
    ChangeoverState::Running,
    ChangeoverState::Stopping,
    ChangeoverState::CountingOut,
    ChangeoverState::Storing,
    ChangeoverState::Delivering,
    ChangeoverState::CountingIn,
    ChangeoverState::Ready,
];

impl ChangeoverState {
    /// Successor in the cycle; wraps `Ready -> Running`.
    pub fn next(self) -> ChangeoverState {
        let idx = CHANGEOVER_CYCLE
            .iter()
            .position(|s| *s == self)
            .expect("ChangeoverState is always a member of CHANGEOVER_CYCLE");
        CHANGEOVER_CYCLE[(idx + 1) % CHANGEOVER_CYCLE.len()]
    }
}

/// Payload fields needed to build a retrieve order, carried by `PayloadReorder`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderRequest {
    pub payload_id: i64,
    pub location: String,
    pub staging_location: Option<String>,
    pub description: Option<String>,
    pub reorder_qty: f64,
    pub retrieve_empty: bool,
}

/// Closed tagged union of every event the bus carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EdgeEvent {
    CounterRead {
        reporting_point_id: i64,
        value: i64,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    CounterDelta {
        line_id: i64,
        job_style_id: i64,
        delta: i64,
        new_count: i64,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    CounterAnomaly {
        reporting_point_id: i64,
        snapshot_id: i64,
        anomaly: AnomalyKind,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },

    PayloadUpdated {
        payload_id: i64,
        remaining: i64,
        status: PayloadStatus,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    PayloadReorder {
        request: ReorderRequest,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },

    OrderCreated {
        order_id: i64,
        order_uuid: Uuid,
        order_type: OrderType,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: i64,
        order_uuid: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        eta: Option<DateTime<Utc>>,
        detail: Option<String>,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    OrderCompleted {
        order_id: i64,
        order_uuid: Uuid,
        order_type: OrderType,
        payload_id: Option<i64>,
        /// The order's own description of what it carries, copied into the
        /// payload's `has_description` on a successful retrieve (§4.F).
        description: Option<String>,
        final_status: OrderStatus,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },

    ChangeoverStarted {
        line_id: i64,
        from_style: Option<i64>,
        to_style: Option<i64>,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    ChangeoverStateChanged {
        line_id: i64,
        state: ChangeoverState,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    ChangeoverCompleted {
        line_id: i64,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },

    PlcConnected {
        plc: String,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    PlcDisconnected {
        plc: String,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    PlcHealthAlert {
        plc: String,
        detail: String,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    PlcHealthRecover {
        plc: String,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },

    GatewayConnected {
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    GatewayDisconnected {
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
}

impl EdgeEvent {
    /// Stable short tag, used for subscription filtering and log fields.
    pub fn tag(&self) -> &'static str {
        match self {
            EdgeEvent::CounterRead { .. } => "counter_read",
            EdgeEvent::CounterDelta { .. } => "counter_delta",
            EdgeEvent::CounterAnomaly { .. } => "counter_anomaly",
            EdgeEvent::PayloadUpdated { .. } => "payload_updated",
            EdgeEvent::PayloadReorder { .. } => "payload_reorder",
            EdgeEvent::OrderCreated { .. } => "order_created",
            EdgeEvent::OrderStatusChanged { .. } => "order_status_changed",
            EdgeEvent::OrderCompleted { .. } => "order_completed",
            EdgeEvent::ChangeoverStarted { .. } => "changeover_started",
            EdgeEvent::ChangeoverStateChanged { .. } => "changeover_state_changed",
            EdgeEvent::ChangeoverCompleted { .. } => "changeover_completed",
            EdgeEvent::PlcConnected { .. } => "plc_connected",
            EdgeEvent::PlcDisconnected { .. } => "plc_disconnected",
            EdgeEvent::PlcHealthAlert { .. } => "plc_health_alert",
            EdgeEvent::PlcHealthRecover { .. } => "plc_health_recover",
            EdgeEvent::GatewayConnected { .. } => "gateway_connected",
            EdgeEvent::GatewayDisconnected { .. } => "gateway_disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changeover_cycle_returns_to_running_after_seven_advances() {
        let mut s = ChangeoverState::Running;
        for _ in 0..7 {
            s = s.next();
        }
        assert_eq!(s, ChangeoverState::Running);
    }

    #[test]
    fn changeover_cycle_order() {
        assert_eq!(ChangeoverState::Running.next(), ChangeoverState::Stopping);
        assert_eq!(ChangeoverState::Ready.next(), ChangeoverState::Running);
    }
}
