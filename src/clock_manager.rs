//! ClockManager (C7): the single fleet authority for the Clock
//! configuration, living at a well-known `EquipmentId`. Subscribes to any
//! traffic addressed to itself, and re-broadcasts every accepted change.

use mrcs_messages::ClockWire;

use crate::clock::Clock;
use crate::db::DbHandle;
use crate::equipment::{EquipmentFilter, EquipmentId, EquipmentType, PublicationRoutingKey, SubscriptionRoutingKey};
use crate::event::SendEvent;
use crate::message::Message;
use crate::node::{Command, MessageHandler, NodeDescriptor};

/// ClockManager's fixed serial. Chosen, not given by the distilled spec —
/// see the design ledger for the reasoning.
pub const CLOCK_MANAGER_SERIAL: u16 = 1;

pub fn id() -> EquipmentId {
    EquipmentId::new(EquipmentType::Crn, None, CLOCK_MANAGER_SERIAL)
}

pub fn descriptor(exchange_name: &str) -> NodeDescriptor {
    NodeDescriptor::new(
        id(),
        exchange_name,
        vec![SubscriptionRoutingKey::new(EquipmentFilter::all(), EquipmentFilter::exact(id()))],
    )
}

pub struct ClockManagerHandler {
    id: EquipmentId,
    db: DbHandle,
    host: String,
}

impl ClockManagerHandler {
    pub fn new(db: DbHandle, host: impl Into<String>) -> Self {
        Self {
            id: id(),
            db,
            host: host.into(),
        }
    }
}

impl MessageHandler for ClockManagerHandler {
    fn handle_message(
        &mut self,
        _routing_key: PublicationRoutingKey,
        message: Message,
        send: &mut dyn SendEvent<Command>,
    ) -> anyhow::Result<()> {
        let wire: ClockWire = match serde_json::from_value(message.payload.clone()) {
            Ok(wire) => wire,
            Err(err) => {
                tracing::warn!(target: "mrcs::clock_manager", %err, "invalid clock config, dropping");
                return Ok(());
            }
        };
        let clock = match Clock::from_wire(wire, chrono::Utc::now()) {
            Ok(clock) => clock,
            Err(err) => {
                tracing::warn!(target: "mrcs::clock_manager", %err, "invalid clock config, dropping");
                return Ok(());
            }
        };

        if Clock::load(&self.db, &self.host)? == Some(clock) {
            tracing::debug!(target: "mrcs::clock_manager", "clock unchanged, suppressing broadcast");
            return Ok(());
        }
        clock.save(&self.db, &self.host)?;

        let echo = Message::forward(
            PublicationRoutingKey::new(self.id, EquipmentFilter::all()),
            clock.to_wire(),
            message.origin,
        )?;
        send.send(Command::Publish(echo))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::in_process::{Exchange, InProcessBroker};
    use crate::broker::Broker;
    use crate::equipment::{EquipmentFilter, SubscriptionRoutingKey};
    use crate::message::Origin;
    use crate::node::{run_subscriber, NodeDescriptor};

    fn wire(minute: u32) -> ClockWire {
        ClockWire {
            is_running: true,
            speed: 2,
            year: 2026,
            month: 1,
            day: 17,
            hour: 6,
            minute,
        }
    }

    #[tokio::test]
    async fn sending_the_same_clock_twice_echoes_only_once() {
        let exchange = Exchange::new();
        let db = DbHandle::open_in_memory().unwrap();
        let handler = ClockManagerHandler::new(db, "host-a");

        let descriptor = NodeDescriptor::new(
            id(),
            "mrcs.test",
            vec![SubscriptionRoutingKey::new(EquipmentFilter::all(), EquipmentFilter::exact(id()))],
        );
        let broker = InProcessBroker::new(exchange.clone());
        let node = tokio::spawn(run_subscriber(broker, descriptor, handler));

        let mut operator = InProcessBroker::new(exchange.clone());
        operator.connect().await.unwrap();
        operator
            .subscribe(
                "q.operator",
                &[SubscriptionRoutingKey::new(EquipmentFilter::exact(id()), EquipmentFilter::all())],
            )
            .await
            .unwrap();

        let mut publisher = InProcessBroker::new(exchange.clone());
        publisher.connect().await.unwrap();

        let origin = Origin::fresh();
        let msg = Message::forward(
            PublicationRoutingKey::new(EquipmentId::new(EquipmentType::Sbo, None, 9), EquipmentFilter::exact(id())),
            wire(25),
            origin,
        )
        .unwrap();
        publisher.publish(&msg).await.unwrap();

        let echoed = operator.recv().await.unwrap().unwrap();
        assert_eq!(echoed.origin, origin);
        let decoded: ClockWire = serde_json::from_slice(&echoed.payload).unwrap();
        assert_eq!(decoded, wire(25));

        // Same payload again: no second echo.
        let msg2 = Message::forward(
            PublicationRoutingKey::new(EquipmentId::new(EquipmentType::Sbo, None, 9), EquipmentFilter::exact(id())),
            wire(25),
            Origin::fresh(),
        )
        .unwrap();
        publisher.publish(&msg2).await.unwrap();

        let next = tokio::time::timeout(std::time::Duration::from_millis(200), operator.recv()).await;
        assert!(next.is_err(), "expected no second echo");

        node.abort();
    }
}
