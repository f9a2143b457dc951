//! Durable outbox, Kafka broker client, and wire-protocol ingestor.
//!
//! Layering: `broker` knows nothing about envelopes, only bytes in and out
//! of Kafka. `outbox` knows nothing about Kafka beyond the `BrokerClient`
//! handle it drains into. `ingestor` knows nothing about storage, only how
//! to turn bytes into a typed `InboundMessage`. The root crate wires all
//! three together with its store and order manager.

pub mod broker;
pub mod ingestor;
pub mod outbox;

pub use broker::{BrokerClient, BrokerConfig, BrokerError};
pub use edge_types::RetryBackoff;
pub use ingestor::{decode, IngestError, InboundMessage, OrderReplyKind};
pub use outbox::{enqueue_envelope, OutboxDrainer, OutboxError, OutboxMessage, OutboxStore};
