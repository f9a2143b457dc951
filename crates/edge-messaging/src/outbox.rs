//! Durable send queue. The store backing pending/sent rows lives in the
//! caller (the root crate's Postgres-backed store); this module only
//! defines the trait the drainer needs and the draining loop itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::broker::BrokerClient;

#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub id: i64,
    pub payload: Vec<u8>,
    pub msg_type: String,
    pub retries: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
#[error("outbox store error: {0}")]
pub struct OutboxError(#[from] pub anyhow::Error);

/// Storage seam for the outbox. Implemented by the root crate's store
/// against its `outbox_messages` table; FIFO-by-id among pending rows is
/// the implementation's responsibility, not the drainer's.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, payload: Vec<u8>, msg_type: &str) -> Result<i64, OutboxError>;
    async fn list_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, OutboxError>;
    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<(), OutboxError>;
    async fn increment_retry(&self, id: i64) -> Result<(), OutboxError>;
}

pub struct OutboxDrainer {
    store: Arc<dyn OutboxStore>,
    broker: Arc<BrokerClient>,
    topic: String,
    drain_interval: Duration,
    batch_size: i64,
}

impl OutboxDrainer {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<BrokerClient>,
        topic: String,
        drain_interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            broker,
            topic,
            drain_interval,
            batch_size,
        }
    }

    /// Run until `shutdown` fires. Never drops or caps retries: a failed
    /// publish leaves the row pending for the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.drain_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }
            self.drain_tick().await;
        }
    }

    async fn drain_tick(&self) {
        if !self.broker.is_connected() {
            return;
        }
        let pending = match self.store.list_pending(self.batch_size).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "outbox drain: list_pending failed");
                return;
            }
        };
        for msg in pending {
            match self.broker.publish(&self.topic, &msg.payload).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_sent(msg.id, Utc::now()).await {
                        warn!(error = %e, id = msg.id, "outbox drain: mark_sent failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, id = msg.id, "outbox drain: publish failed, will retry");
                    if let Err(e) = self.store.increment_retry(msg.id).await {
                        warn!(error = %e, id = msg.id, "outbox drain: increment_retry failed");
                    }
                    // Broker looked down for this message; stop draining
                    // this tick to preserve FIFO order rather than skip
                    // ahead to rows behind it.
                    break;
                }
            }
        }
    }
}

/// Enqueue a pre-built wire envelope and log the publish-queueing at the
/// call site's chosen level. Thin helper so callers don't repeat
/// `to_bytes` + `enqueue` + logging.
pub async fn enqueue_envelope(
    store: &dyn OutboxStore,
    msg_type: &str,
    bytes: Vec<u8>,
) -> Result<i64, OutboxError> {
    let id = store.enqueue(bytes, msg_type).await?;
    info!(id, msg_type, "queued outbound envelope");
    Ok(id)
}
