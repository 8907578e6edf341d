//! ClockConf: a transient operator helper that proposes one Clock change and
//! halts as soon as ClockManager echoes it back (§4.6). Not a long-lived
//! node; `run_subscriber` returns as soon as `is_done()` goes true.

use mrcs_messages::ClockWire;

use crate::clock_manager;
use crate::equipment::{EquipmentFilter, EquipmentId, EquipmentType, PublicationRoutingKey};
use crate::event::SendEvent;
use crate::message::{Message, Origin};
use crate::node::{Command, MessageHandler, NodeDescriptor};

/// Chosen operator-tool serial, distinct from any long-lived node's. See the
/// design ledger for the reasoning (the distilled spec gives ClockConf no
/// fixed identity of its own).
pub const CLOCK_CONF_SERIAL: u16 = 99;

pub fn id() -> EquipmentId {
    EquipmentId::new(EquipmentType::Crn, None, CLOCK_CONF_SERIAL)
}

pub fn descriptor(exchange_name: &str) -> NodeDescriptor {
    NodeDescriptor::new(
        id(),
        exchange_name,
        vec![crate::equipment::SubscriptionRoutingKey::new(
            EquipmentFilter::exact(clock_manager::id()),
            EquipmentFilter::all(),
        )],
    )
}

pub struct ClockConfHandler {
    id: EquipmentId,
    proposal: ClockWire,
    sent_origin: Option<Origin>,
    done: bool,
}

impl ClockConfHandler {
    pub fn new(proposal: ClockWire) -> Self {
        Self {
            id: id(),
            proposal,
            sent_origin: None,
            done: false,
        }
    }
}

impl MessageHandler for ClockConfHandler {
    fn handle_startup(&mut self, send: &mut dyn SendEvent<Command>) -> anyhow::Result<()> {
        let proposal = Message::originate(
            PublicationRoutingKey::new(self.id, EquipmentFilter::exact(clock_manager::id())),
            self.proposal,
        )?;
        self.sent_origin = Some(proposal.origin);
        send.send(Command::Publish(proposal))?;
        Ok(())
    }

    fn handle_message(
        &mut self,
        _routing_key: PublicationRoutingKey,
        message: Message,
        _send: &mut dyn SendEvent<Command>,
    ) -> anyhow::Result<()> {
        if Some(message.origin) == self.sent_origin {
            tracing::debug!(target: "mrcs::clock_conf", origin = %message.origin, "proposal confirmed, halting");
            self.done = true;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::in_process::{Exchange, InProcessBroker};
    use crate::clock::Clock;
    use crate::clock_manager::ClockManagerHandler;
    use crate::db::DbHandle;
    use crate::node::{run_subscriber, NodeDescriptor};
    use std::time::Duration;

    fn wire() -> ClockWire {
        ClockWire {
            is_running: true,
            speed: 2,
            year: 2026,
            month: 1,
            day: 17,
            hour: 6,
            minute: 25,
        }
    }

    #[tokio::test]
    async fn halts_once_clock_manager_echoes_the_proposal() {
        let exchange = Exchange::new();
        let db = DbHandle::open_in_memory().unwrap();
        let manager_descriptor = NodeDescriptor::new(
            clock_manager::id(),
            "mrcs.test",
            vec![crate::equipment::SubscriptionRoutingKey::new(
                EquipmentFilter::all(),
                EquipmentFilter::exact(clock_manager::id()),
            )],
        );
        let manager = tokio::spawn(run_subscriber(
            InProcessBroker::new(exchange.clone()),
            manager_descriptor,
            ClockManagerHandler::new(db, "host-a"),
        ));

        let conf = run_subscriber(
            InProcessBroker::new(exchange.clone()),
            descriptor("mrcs.test"),
            ClockConfHandler::new(wire()),
        );
        tokio::time::timeout(Duration::from_secs(2), conf)
            .await
            .expect("clock conf should halt once echoed")
            .unwrap();

        manager.abort();
    }

    #[test]
    fn proposal_round_trips_through_clock_decode() {
        let decoded = Clock::from_wire(wire(), chrono::Utc::now()).unwrap();
        assert_eq!(decoded.to_wire(), wire());
    }
}
