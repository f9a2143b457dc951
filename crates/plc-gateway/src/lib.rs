//! PLC gateway client: maintains a cache of tag values fed by polling or an
//! SSE stream from the upstream HTTP gateway, and emits connection
//! transition events onto a channel the caller wires into the event bus.

pub mod cache;
pub mod client;

pub use cache::{GatewayCache, PlcState, ReadError, TagEntry, TagValue};
pub use client::{GatewayClient, GatewayConfig, GatewayError, GatewayMode};
pub use edge_types::RetryBackoff;
