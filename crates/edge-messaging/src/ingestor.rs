//! Inbound wire protocol handling: two-phase decode, then dispatch by
//! message type into a typed `InboundMessage` the caller routes to the
//! order manager or the heartbeat/production-report logger.

use chrono::{DateTime, Utc};
use edge_types::envelope::{Envelope, EnvelopeHeader, HeaderError, MessageType};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("unsupported message type for ingestion: {0:?}")]
    Unsupported(MessageType),
}

#[derive(Debug, Clone)]
pub enum OrderReplyKind {
    Ack,
    Waybill { waybill_id: String, eta: Option<DateTime<Utc>> },
    Update { eta: Option<DateTime<Utc>> },
    Delivered,
    Error { detail: String },
    Cancelled { detail: Option<String> },
}

#[derive(Debug, Clone)]
pub enum InboundMessage {
    OrderReply { order_uuid: Uuid, kind: OrderReplyKind },
    Data { subject: String, data: serde_json::Value },
    /// A recognised-but-not-ours message type (`Other`, or a message type
    /// this edge never consumes, e.g. `order.request`). Logged and dropped
    /// by the caller.
    Ignored,
}

#[derive(Deserialize)]
struct OrderUuidOnly {
    order_uuid: Uuid,
}

#[derive(Deserialize)]
struct WaybillPayload {
    order_uuid: Uuid,
    waybill_id: String,
    #[serde(default)]
    eta: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct UpdatePayload {
    order_uuid: Uuid,
    #[serde(default)]
    eta: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    order_uuid: Uuid,
    detail: String,
}

#[derive(Deserialize)]
struct CancelledPayload {
    order_uuid: Uuid,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Deserialize)]
struct DataPayload {
    subject: String,
    data: serde_json::Value,
}

/// Decode one inbound message. `bytes` is the raw broker record payload.
/// `self_station` gates the destination filter in the header pass.
pub fn decode(bytes: &[u8], self_station: &str) -> Result<InboundMessage, IngestError> {
    let header = EnvelopeHeader::parse(bytes)?;
    header.admit(self_station, Utc::now())?;

    match header.msg_type {
        MessageType::OrderAck => {
            let env: Envelope<OrderUuidOnly> = serde_json::from_slice(bytes)?;
            Ok(InboundMessage::OrderReply {
                order_uuid: env.p.order_uuid,
                kind: OrderReplyKind::Ack,
            })
        }
        MessageType::OrderWaybill => {
            let env: Envelope<WaybillPayload> = serde_json::from_slice(bytes)?;
            Ok(InboundMessage::OrderReply {
                order_uuid: env.p.order_uuid,
                kind: OrderReplyKind::Waybill {
                    waybill_id: env.p.waybill_id,
                    eta: env.p.eta,
                },
            })
        }
        MessageType::OrderUpdate => {
            let env: Envelope<UpdatePayload> = serde_json::from_slice(bytes)?;
            Ok(InboundMessage::OrderReply {
                order_uuid: env.p.order_uuid,
                kind: OrderReplyKind::Update { eta: env.p.eta },
            })
        }
        MessageType::OrderDelivered => {
            let env: Envelope<OrderUuidOnly> = serde_json::from_slice(bytes)?;
            Ok(InboundMessage::OrderReply {
                order_uuid: env.p.order_uuid,
                kind: OrderReplyKind::Delivered,
            })
        }
        MessageType::OrderError => {
            let env: Envelope<ErrorPayload> = serde_json::from_slice(bytes)?;
            Ok(InboundMessage::OrderReply {
                order_uuid: env.p.order_uuid,
                kind: OrderReplyKind::Error { detail: env.p.detail },
            })
        }
        MessageType::OrderCancelled => {
            let env: Envelope<CancelledPayload> = serde_json::from_slice(bytes)?;
            Ok(InboundMessage::OrderReply {
                order_uuid: env.p.order_uuid,
                kind: OrderReplyKind::Cancelled { detail: env.p.detail },
            })
        }
        MessageType::Data => {
            let env: Envelope<DataPayload> = serde_json::from_slice(bytes)?;
            Ok(InboundMessage::Data {
                subject: env.p.subject,
                data: env.p.data,
            })
        }
        MessageType::OrderRequest
        | MessageType::OrderCancel
        | MessageType::OrderRedirect
        | MessageType::OrderStorageWaybill
        | MessageType::OrderReceipt
        | MessageType::Other => Ok(InboundMessage::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_types::envelope::Party;

    fn party(station: &str) -> Party {
        Party {
            role: "core".to_string(),
            station: station.to_string(),
            factory: "f1".to_string(),
        }
    }

    #[test]
    fn decodes_ack_into_order_reply() {
        let env = Envelope::new(
            MessageType::OrderAck,
            party("core"),
            party("line1.edge"),
            chrono::Duration::minutes(10),
            None,
            OrderUuidOnlySer { order_uuid: Uuid::new_v4() },
        );
        let bytes = env.to_bytes().unwrap();
        let msg = decode(&bytes, "line1.edge").unwrap();
        assert!(matches!(
            msg,
            InboundMessage::OrderReply { kind: OrderReplyKind::Ack, .. }
        ));
    }

    #[test]
    fn decodes_data_message_by_subject() {
        let env = Envelope::new(
            MessageType::Data,
            party("core"),
            party("*"),
            chrono::Duration::minutes(5),
            None,
            DataPayloadSer {
                subject: "edge.heartbeat_ack".to_string(),
                data: serde_json::json!({"ok": true}),
            },
        );
        let bytes = env.to_bytes().unwrap();
        let msg = decode(&bytes, "line1.edge").unwrap();
        match msg {
            InboundMessage::Data { subject, .. } => assert_eq!(subject, "edge.heartbeat_ack"),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn unknown_order_type_produced_by_edge_is_ignored_not_erred() {
        let env = Envelope::new(
            MessageType::OrderRequest,
            party("line1.edge"),
            party("core"),
            chrono::Duration::minutes(10),
            None,
            serde_json::json!({"irrelevant": true}),
        );
        let bytes = env.to_bytes().unwrap();
        let msg = decode(&bytes, "core").unwrap();
        assert!(matches!(msg, InboundMessage::Ignored));
    }

    // Serialize-only mirrors of the Deserialize-only payload structs above,
    // needed because `Envelope::new` requires `P: Serialize`.
    #[derive(serde::Serialize)]
    struct OrderUuidOnlySer {
        order_uuid: Uuid,
    }

    #[derive(serde::Serialize)]
    struct DataPayloadSer {
        subject: String,
        data: serde_json::Value,
    }
}
