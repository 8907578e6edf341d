//! The message envelope (C2): a routing key, a JSON payload, and an origin
//! correlation id.

use serde::Serialize;
use uuid::Uuid;

use crate::equipment::PublicationRoutingKey;
use crate::error::MalformedPayload;

/// Opaque correlation identifier assigned at first construction and
/// preserved across forwards/echoes. Only needs to be unique for the life of
/// the process, so a v4 UUID is a fine, cheap implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub struct Origin(pub Uuid);

impl Origin {
    /// A fresh origin, used whenever a node originates a message.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub routing_key: PublicationRoutingKey,
    pub payload: serde_json::Value,
    pub origin: Origin,
}

impl Message {
    /// Originate a brand new message: fresh origin.
    pub fn originate(routing_key: PublicationRoutingKey, payload: impl Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            routing_key,
            payload: serde_json::to_value(payload)?,
            origin: Origin::fresh(),
        })
    }

    /// Forward/echo an inbound message under a (possibly different) routing
    /// key, reusing its origin so the originator recognises the round trip.
    pub fn forward(routing_key: PublicationRoutingKey, payload: impl Serialize, origin: Origin) -> anyhow::Result<Self> {
        Ok(Self {
            routing_key,
            payload: serde_json::to_value(payload)?,
            origin,
        })
    }

    /// Decode an inbound delivery. The origin is carried out-of-band by the
    /// broker layer (see `broker::Delivery`), not by this constructor, since
    /// it is not part of the JSON body.
    pub fn construct_from_callback(
        routing_key: PublicationRoutingKey,
        payload_bytes: &[u8],
        origin: Origin,
    ) -> Result<Self, MalformedPayload> {
        let payload = serde_json::from_slice(payload_bytes)
            .map_err(|err| MalformedPayload(format!("{err}")))?;
        Ok(Self {
            routing_key,
            payload,
            origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::{EquipmentFilter, EquipmentId, EquipmentType};

    #[test]
    fn forward_preserves_origin() {
        let inbound_origin = Origin::fresh();
        let key = PublicationRoutingKey::new(
            EquipmentId::new(EquipmentType::Crn, None, 1),
            EquipmentFilter::all(),
        );
        let msg = Message::forward(key, serde_json::json!({"a": 1}), inbound_origin).unwrap();
        assert_eq!(msg.origin, inbound_origin);
    }

    #[test]
    fn originate_assigns_fresh_origin_each_time() {
        let key = PublicationRoutingKey::new(
            EquipmentId::new(EquipmentType::Crn, None, 1),
            EquipmentFilter::all(),
        );
        let a = Message::originate(key.clone(), serde_json::json!(1)).unwrap();
        let b = Message::originate(key, serde_json::json!(1)).unwrap();
        assert_ne!(a.origin, b.origin);
    }

    #[test]
    fn construct_from_callback_rejects_malformed_json() {
        let key = PublicationRoutingKey::new(
            EquipmentId::new(EquipmentType::Crn, None, 1),
            EquipmentFilter::all(),
        );
        let err = Message::construct_from_callback(key, b"not json", Origin::fresh()).unwrap_err();
        assert!(err.to_string().contains("malformed payload"));
    }
}
