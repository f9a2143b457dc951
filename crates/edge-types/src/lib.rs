//! Shared types that cross component boundaries in the station edge runtime:
//! the closed event-bus event set and the broker wire envelope.

pub mod backoff;
pub mod envelope;
pub mod events;

pub use backoff::RetryBackoff;
pub use envelope::{DestinationFilter, Envelope, EnvelopeHeader, MessageType};
pub use events::{AnomalyKind, ChangeoverState, EdgeEvent, OrderStatus, OrderType, PayloadStatus, ReorderRequest};
