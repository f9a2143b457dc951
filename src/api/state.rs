//! Shared axum state: handles to every engine component the routes call
//! into, plus the admin session store and the event broadcast sender.

use std::sync::Arc;

use edge_types::EdgeEvent;
use tokio::sync::{broadcast, watch};

use crate::api::session::SessionStore;
use crate::bus::EventBus;
use crate::changeover::ChangeoverManager;
use crate::order_manager::OrderManager;
use crate::payload_engine::PayloadEngine;
use crate::store::admin::AdminStore;
use crate::store::payloads::PayloadStore;
use crate::store::reporting_points::ReportingPointStore;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub payloads: Arc<PayloadEngine>,
    pub payload_store: Arc<dyn PayloadStore>,
    pub changeover: Arc<ChangeoverManager>,
    pub reporting_points: Arc<dyn ReportingPointStore>,
    pub admin: Arc<dyn AdminStore>,
    pub bus: Arc<EventBus>,
    pub sessions: SessionStore,
    pub events: broadcast::Sender<EdgeEvent>,
    /// Watched by the `/events` handler so an open long-poll ends as soon
    /// as shutdown is signalled, instead of only when the client goes away.
    pub shutdown: watch::Receiver<bool>,
    pub auto_confirm: bool,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<OrderManager>,
        payloads: Arc<PayloadEngine>,
        payload_store: Arc<dyn PayloadStore>,
        changeover: Arc<ChangeoverManager>,
        reporting_points: Arc<dyn ReportingPointStore>,
        admin: Arc<dyn AdminStore>,
        bus: Arc<EventBus>,
        events: broadcast::Sender<EdgeEvent>,
        shutdown: watch::Receiver<bool>,
        auto_confirm: bool,
    ) -> Self {
        Self {
            orders,
            payloads,
            payload_store,
            changeover,
            reporting_points,
            admin,
            bus,
            sessions: SessionStore::new(),
            events,
            shutdown,
            auto_confirm,
        }
    }
}
