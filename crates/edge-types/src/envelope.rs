//! The broker wire envelope and its two-phase decode.
//!
//! Every message on `shingo.orders` / `shingo.dispatch` is one JSON object
//! shaped like:
//!
//! ```json
//! { "v":1, "type":"order.request", "id":"...", "src":{...}, "dst":{...},
//!   "ts":"...", "exp":"...", "cor":null, "p":{...} }
//! ```
//!
//! Decoding happens in two passes: `EnvelopeHeader` parses only enough to
//! filter (version, expiry, destination); the payload `p` is kept as raw
//! JSON until the header passes, and only then decoded per `type`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WIRE_VERSION: u32 = 1;
pub const BROADCAST_STATION: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub role: String,
    pub station: String,
    pub factory: String,
}

/// Every `type` the edge produces or consumes. Unknown types decode into
/// `Other` and are logged + dropped by the ingestor rather than rejected
/// at the header stage (the header doesn't need to know `type` meaning,
/// only that it's present).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[serde(rename = "order.request")]
    OrderRequest,
    #[serde(rename = "order.cancel")]
    OrderCancel,
    #[serde(rename = "order.redirect")]
    OrderRedirect,
    #[serde(rename = "order.storage_waybill")]
    OrderStorageWaybill,
    #[serde(rename = "order.receipt")]
    OrderReceipt,
    #[serde(rename = "order.ack")]
    OrderAck,
    #[serde(rename = "order.waybill")]
    OrderWaybill,
    #[serde(rename = "order.update")]
    OrderUpdate,
    #[serde(rename = "order.delivered")]
    OrderDelivered,
    #[serde(rename = "order.error")]
    OrderError,
    #[serde(rename = "order.cancelled")]
    OrderCancelled,
    #[serde(rename = "data")]
    Data,
    #[serde(other)]
    Other,
}

impl MessageType {
    /// Default TTL per `spec.md` §6. `Other` falls back to 10 minutes.
    ///
    /// `Data`'s arm is a fallback only; the `data` message type's real TTL
    /// depends on its `DataPayload.subject`, not just the outer type. Use
    /// `data_subject_ttl` for anything produced on the `data` channel.
    pub fn default_ttl(&self) -> Duration {
        match self {
            MessageType::OrderRequest
            | MessageType::OrderCancel
            | MessageType::OrderRedirect
            | MessageType::OrderUpdate => Duration::minutes(10),
            MessageType::OrderStorageWaybill
            | MessageType::OrderReceipt
            | MessageType::OrderError
            | MessageType::OrderCancelled => Duration::minutes(30),
            MessageType::OrderDelivered => Duration::minutes(60),
            MessageType::OrderAck | MessageType::OrderWaybill => Duration::minutes(10),
            MessageType::Data => Duration::minutes(10),
            MessageType::Other => Duration::minutes(10),
        }
    }
}

/// Data-channel subjects the edge produces.
pub mod produced_subjects {
    pub const EDGE_REGISTER: &str = "edge.register";
    pub const EDGE_HEARTBEAT: &str = "edge.heartbeat";
    pub const PRODUCTION_REPORT: &str = "production.report";
}

/// Data-channel subjects the edge consumes.
pub mod consumed_subjects {
    pub const EDGE_REGISTERED: &str = "edge.registered";
    pub const EDGE_HEARTBEAT_ACK: &str = "edge.heartbeat_ack";
}

/// TTL for a `data`-channel envelope, keyed by `DataPayload.subject` per
/// `spec.md` §6: heartbeat/heartbeat-ack get 90s, register/registered get
/// 5 minutes, everything else (including `production.report`) falls back
/// to 10 minutes.
pub fn data_subject_ttl(subject: &str) -> Duration {
    match subject {
        s if s == produced_subjects::EDGE_HEARTBEAT || s == consumed_subjects::EDGE_HEARTBEAT_ACK => {
            Duration::seconds(90)
        }
        s if s == produced_subjects::EDGE_REGISTER || s == consumed_subjects::EDGE_REGISTERED => {
            Duration::minutes(5)
        }
        _ => Duration::minutes(10),
    }
}

/// The `data` message type's payload: `{subject, data}`. `data` is decoded
/// by subject only after the outer envelope has already passed filtering,
/// mirroring the envelope's own two-phase decode one level down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPayload {
    pub subject: String,
    pub data: serde_json::Value,
}

/// First-pass decode target: just enough to filter before touching `p`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeHeader {
    pub v: u32,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub id: Uuid,
    pub dst: Party,
    pub exp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
    #[error("envelope expired at {exp}, now is {now}")]
    Expired { exp: DateTime<Utc>, now: DateTime<Utc> },
    #[error("destination station {dst} does not match self {self_station}")]
    WrongDestination { dst: String, self_station: String },
    #[error("malformed envelope header: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl EnvelopeHeader {
    /// Parse only the header fields from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<EnvelopeHeader, HeaderError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Apply the version/expiry/destination filter. On success, the caller
    /// may proceed to parse `p`.
    pub fn admit(&self, self_station: &str, now: DateTime<Utc>) -> Result<(), HeaderError> {
        if self.v != WIRE_VERSION {
            return Err(HeaderError::UnsupportedVersion(self.v));
        }
        if self.exp < now {
            return Err(HeaderError::Expired { exp: self.exp, now });
        }
        if self.dst.station != self_station && self.dst.station != BROADCAST_STATION {
            return Err(HeaderError::WrongDestination {
                dst: self.dst.station.clone(),
                self_station: self_station.to_string(),
            });
        }
        Ok(())
    }
}

/// Full envelope, parsed only after the header has been admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub v: u32,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub id: Uuid,
    pub src: Party,
    pub dst: Party,
    pub ts: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    #[serde(default)]
    pub cor: Option<Uuid>,
    pub p: P,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationFilter {
    Station(String),
    Broadcast,
}

impl<P> Envelope<P>
where
    P: Serialize,
{
    pub fn new(
        msg_type: MessageType,
        src: Party,
        dst: Party,
        ttl: Duration,
        cor: Option<Uuid>,
        p: P,
    ) -> Envelope<P> {
        let now = Utc::now();
        Envelope {
            v: WIRE_VERSION,
            msg_type,
            id: Uuid::new_v4(),
            src,
            dst,
            ts: now,
            exp: now + ttl,
            cor,
            p,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn party(station: &str) -> Party {
        Party {
            role: "edge".to_string(),
            station: station.to_string(),
            factory: "f1".to_string(),
        }
    }

    #[test]
    fn data_subject_ttl_matches_per_subject_table() {
        assert_eq!(data_subject_ttl(produced_subjects::EDGE_HEARTBEAT), Duration::seconds(90));
        assert_eq!(data_subject_ttl(consumed_subjects::EDGE_HEARTBEAT_ACK), Duration::seconds(90));
        assert_eq!(data_subject_ttl(produced_subjects::EDGE_REGISTER), Duration::minutes(5));
        assert_eq!(data_subject_ttl(consumed_subjects::EDGE_REGISTERED), Duration::minutes(5));
        assert_eq!(data_subject_ttl(produced_subjects::PRODUCTION_REPORT), Duration::minutes(10));
        assert_eq!(data_subject_ttl("unknown.subject"), Duration::minutes(10));
    }

    #[test]
    fn header_round_trip_preserves_filter_fields() {
        let env = Envelope::new(
            MessageType::OrderRequest,
            party("line1.edge"),
            party("core"),
            Duration::minutes(10),
            None,
            serde_json::json!({"qty": 5}),
        );
        let bytes = env.to_bytes().unwrap();
        let header = EnvelopeHeader::parse(&bytes).unwrap();
        assert_eq!(header.v, env.v);
        assert_eq!(header.msg_type, env.msg_type);
        assert_eq!(header.id, env.id);
        assert_eq!(header.dst, env.dst);
        assert_eq!(header.exp, env.exp);
    }

    #[test]
    fn expired_envelope_is_rejected_before_payload_parse() {
        let env = Envelope::new(
            MessageType::OrderAck,
            party("core"),
            party("line1.edge"),
            Duration::seconds(-1),
            None,
            serde_json::json!({"should": "never be read"}),
        );
        let bytes = env.to_bytes().unwrap();
        let header = EnvelopeHeader::parse(&bytes).unwrap();
        let result = header.admit("line1.edge", Utc::now());
        assert!(matches!(result, Err(HeaderError::Expired { .. })));
    }

    #[test]
    fn wrong_destination_is_rejected_unless_broadcast() {
        let env = Envelope::new(
            MessageType::OrderAck,
            party("core"),
            party("other_line.edge"),
            Duration::minutes(10),
            None,
            serde_json::json!({}),
        );
        let bytes = env.to_bytes().unwrap();
        let header = EnvelopeHeader::parse(&bytes).unwrap();
        assert!(header.admit("line1.edge", Utc::now()).is_err());

        let broadcast_env = Envelope::new(
            MessageType::OrderAck,
            party("core"),
            party(BROADCAST_STATION),
            Duration::minutes(10),
            None,
            serde_json::json!({}),
        );
        let bytes = broadcast_env.to_bytes().unwrap();
        let header = EnvelopeHeader::parse(&bytes).unwrap();
        assert!(header.admit("line1.edge", Utc::now()).is_ok());
    }

    proptest! {
        #[test]
        fn header_decode_never_panics_on_arbitrary_json(s in "\\PC*") {
            let _ = EnvelopeHeader::parse(s.as_bytes());
        }
    }
}
