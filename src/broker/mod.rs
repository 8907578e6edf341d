//! BrokerClient (C3): a topic-exchange publish/subscribe fabric with
//! reconnection, shared between a real AMQP-backed implementation
//! ([`lapin_client`]) and an in-process fake used by tests
//! ([`in_process`]).
//!
//! Every flavour implements [`Broker`], so node runtimes and node handlers
//! are written once, generic over `B: Broker`.

pub mod in_process;
pub mod lapin_client;

use async_trait::async_trait;

use crate::equipment::{EquipmentId, SubscriptionRoutingKey};
use crate::message::{Message, Origin};

/// An inbound delivery as handed to a node, before self-suppression and
/// payload decoding.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub routing_key_wire: String,
    pub payload: Vec<u8>,
    pub origin: Origin,
    pub delivery_tag: u64,
}

/// The broker-client contract shared by both flavours (§4.3). Implementors
/// own their reconnect policy internally: every method here either succeeds
/// or keeps retrying, it never surfaces a transient transport error to the
/// caller (a `TransportError` is something this layer recovers from, not
/// something handlers need to handle, per the design's error taxonomy).
#[async_trait]
pub trait Broker: Send {
    /// Open a connection, declare the exchange (topic, durable), open a
    /// publisher-confirms channel.
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Declare `queue` durable and non-exclusive, install every binding,
    /// and start consuming from it. A single consumer per queue.
    async fn subscribe(&mut self, queue: &str, bindings: &[SubscriptionRoutingKey]) -> anyhow::Result<()>;

    /// Publish with `content_type: application/json`,
    /// `delivery_mode: persistent`.
    async fn publish(&mut self, msg: &Message) -> anyhow::Result<()>;

    /// Block until the next delivery arrives, or `None` if the consumer
    /// stream has been closed deliberately (e.g. after `close`).
    async fn recv(&mut self) -> anyhow::Result<Option<Delivery>>;

    /// Ack a delivery tag obtained from `recv`.
    async fn ack(&mut self, delivery_tag: u64) -> anyhow::Result<()>;

    /// Close the channel; reconnect is suppressed afterwards.
    async fn close(&mut self) -> anyhow::Result<()>;

    /// Tear down `queue` and every binding on it (the `--clean` CLI verb).
    /// Does not touch the exchange itself, since other nodes still use it.
    async fn teardown(&mut self, queue: &str) -> anyhow::Result<()>;
}

/// Handle a single inbound delivery against a node's own identity and a
/// synchronous handler, applying self-suppression (§3, §4.3) and the
/// ack-iff-Ok policy (§9) uniformly for every `Broker` implementation.
///
/// Returns `true` if the frame was acked (either self-suppressed or the
/// handler returned `Ok`), `false` if the handler errored and the frame was
/// deliberately left un-acked for redelivery.
pub async fn dispatch_delivery<B: Broker + ?Sized>(
    broker: &mut B,
    self_id: EquipmentId,
    delivery: Delivery,
    mut handle: impl FnMut(crate::equipment::PublicationRoutingKey, Message) -> anyhow::Result<()>,
) -> anyhow::Result<bool> {
    let routing_key = match crate::equipment::PublicationRoutingKey::parse(&delivery.routing_key_wire) {
        Ok(routing_key) => routing_key,
        Err(err) => {
            broker.ack(delivery.delivery_tag).await?;
            tracing::warn!(target: "mrcs::broker", %err, "malformed routing key, acked and dropped");
            return Ok(true);
        }
    };

    if routing_key.source == self_id {
        broker.ack(delivery.delivery_tag).await?;
        tracing::debug!(target: "mrcs::broker", source = %routing_key.source, "self-suppressed frame, acked and dropped");
        return Ok(true);
    }

    let message = match Message::construct_from_callback(routing_key.clone(), &delivery.payload, delivery.origin) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(target: "mrcs::broker", %err, "malformed payload, dropping without ack");
            return Ok(false);
        }
    };

    match handle(routing_key, message) {
        Ok(()) => {
            broker.ack(delivery.delivery_tag).await?;
            Ok(true)
        }
        Err(err) => {
            tracing::warn!(target: "mrcs::broker", %err, "handler errored, leaving unacked for redelivery");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::in_process::{Exchange, InProcessBroker};
    use crate::equipment::{EquipmentFilter, EquipmentId, EquipmentType, PublicationRoutingKey};

    fn id(ty: EquipmentType, serial: u16) -> EquipmentId {
        EquipmentId::new(ty, None, serial)
    }

    /// A node must never hand its own broadcasts to its own handler (§3,
    /// Testable Property #2): the frame is acked and dropped before
    /// `handle` is ever called.
    #[tokio::test]
    async fn self_published_delivery_is_acked_without_reaching_the_handler() {
        let exchange = Exchange::new();
        let self_id = id(EquipmentType::Crn, 1);

        let mut publisher = InProcessBroker::new(exchange.clone());
        publisher.connect().await.unwrap();

        let mut subscriber = InProcessBroker::new(exchange.clone());
        subscriber.connect().await.unwrap();
        subscriber
            .subscribe("q.crn", &[SubscriptionRoutingKey::new(EquipmentFilter::exact(self_id), EquipmentFilter::all())])
            .await
            .unwrap();

        let msg = Message::originate(PublicationRoutingKey::new(self_id, EquipmentFilter::all()), serde_json::json!("echo")).unwrap();
        publisher.publish(&msg).await.unwrap();

        let delivery = subscriber.recv().await.unwrap().unwrap();
        let mut handler_called = false;
        let acked = dispatch_delivery(&mut subscriber, self_id, delivery, |_routing_key, _message| {
            handler_called = true;
            Ok(())
        })
        .await
        .unwrap();

        assert!(acked, "self-suppressed delivery must still be acked");
        assert!(!handler_called, "handler must not see a node's own broadcasts");
        assert_eq!(subscriber.acked_count(), 1);
    }
}
