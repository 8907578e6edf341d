//! An in-process fake of the topic exchange, used by tests so node and
//! scenario tests can run without a live broker.
//!
//! Matching happens at the level of the six wire tokens directly (not
//! through `EquipmentFilter::matches`), because a published routing key's
//! target may itself carry a literal `*` token (a broadcast) — the same
//! token-for-token comparison a real AMQP topic exchange performs between a
//! binding pattern's words and a published key's words.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{Broker, Delivery};
use crate::equipment::SubscriptionRoutingKey;
use crate::message::Message;

fn topic_tokens_match(binding_wire: &str, published_wire: &str) -> bool {
    let binding: Vec<&str> = binding_wire.split('.').collect();
    let published: Vec<&str> = published_wire.split('.').collect();
    binding.len() == published.len()
        && binding
            .iter()
            .zip(published.iter())
            .all(|(b, p)| *b == "*" || b == p)
}

struct Binding {
    queue: String,
    pattern: String,
    sender: UnboundedSender<Delivery>,
}

#[derive(Default)]
struct ExchangeState {
    bindings: Vec<Binding>,
}

/// A shared exchange that multiple [`InProcessBroker`] handles publish to
/// and consume from, modelling one broker process.
#[derive(Clone, Default)]
pub struct Exchange(Arc<Mutex<ExchangeState>>);

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct InProcessBroker {
    exchange: Exchange,
    next_tag: Arc<AtomicU64>,
    acked: Arc<AtomicU64>,
    receiver: Option<UnboundedReceiver<Delivery>>,
    queue: Option<String>,
}

impl InProcessBroker {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            next_tag: Arc::new(AtomicU64::new(1)),
            acked: Arc::new(AtomicU64::new(0)),
            receiver: None,
            queue: None,
        }
    }

    /// Number of deliveries acked so far on this handle (including
    /// self-suppressed ones), for test assertions.
    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn subscribe(&mut self, queue: &str, bindings: &[SubscriptionRoutingKey]) -> anyhow::Result<()> {
        let (sender, receiver) = unbounded_channel();
        let mut state = self.exchange.0.lock().unwrap();
        for pattern in bindings {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                pattern: pattern.format(),
                sender: sender.clone(),
            });
        }
        drop(state);
        self.receiver = Some(receiver);
        self.queue = Some(queue.to_string());
        Ok(())
    }

    async fn publish(&mut self, msg: &Message) -> anyhow::Result<()> {
        let wire = msg.routing_key.format();
        let payload = serde_json::to_vec(&msg.payload)?;
        let state = self.exchange.0.lock().unwrap();
        // A durable queue with multiple bindings should only receive one
        // copy of a message that matches more than one of its bindings, so
        // dedupe by queue name the way a real queue would.
        let mut delivered_to: std::collections::HashSet<&str> = Default::default();
        for binding in &state.bindings {
            if topic_tokens_match(&binding.pattern, &wire) && delivered_to.insert(&binding.queue) {
                let _ = binding.sender.send(Delivery {
                    routing_key_wire: wire.clone(),
                    payload: payload.clone(),
                    origin: msg.origin,
                    delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
                });
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<Option<Delivery>> {
        match &mut self.receiver {
            Some(receiver) => Ok(receiver.recv().await),
            None => anyhow::bail!("recv called before subscribe"),
        }
    }

    async fn ack(&mut self, _delivery_tag: u64) -> anyhow::Result<()> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.receiver = None;
        Ok(())
    }

    async fn teardown(&mut self, queue: &str) -> anyhow::Result<()> {
        let mut state = self.exchange.0.lock().unwrap();
        state.bindings.retain(|binding| binding.queue != queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::{EquipmentFilter, EquipmentId, EquipmentType, PublicationRoutingKey};

    fn id(ty: EquipmentType, serial: u16) -> EquipmentId {
        EquipmentId::new(ty, None, serial)
    }

    #[tokio::test]
    async fn binding_with_wildcard_target_receives_broadcast() {
        let exchange = Exchange::new();
        let mut publisher = InProcessBroker::new(exchange.clone());
        publisher.connect().await.unwrap();

        let mut subscriber = InProcessBroker::new(exchange.clone());
        subscriber.connect().await.unwrap();
        subscriber
            .subscribe(
                "q.omp",
                &[SubscriptionRoutingKey::new(EquipmentFilter::all(), EquipmentFilter::exact(id(EquipmentType::Omp, 1)))],
            )
            .await
            .unwrap();

        let mut other = InProcessBroker::new(exchange.clone());
        other.connect().await.unwrap();
        other
            .subscribe(
                "q.mpu",
                &[SubscriptionRoutingKey::new(EquipmentFilter::all(), EquipmentFilter::exact(id(EquipmentType::Mpu, 1)))],
            )
            .await
            .unwrap();

        let msg = Message::originate(
            PublicationRoutingKey::new(id(EquipmentType::Sbo, 2), EquipmentFilter::exact(id(EquipmentType::Omp, 1))),
            serde_json::json!("hello"),
        )
        .unwrap();
        publisher.publish(&msg).await.unwrap();

        let got = subscriber.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, b"\"hello\"");

        assert!(other.receiver.is_none() || other.receiver.as_mut().unwrap().try_recv().is_err());
    }
}
