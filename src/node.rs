//! The MessagingNode runtime (C4): connect -> declare -> bind -> consume ->
//! dispatch -> halt, generic over any [`Broker`] and any [`MessageHandler`].
//!
//! Node identity/routing is a plain [`NodeDescriptor`] value, not a
//! subclass: the runtime dispatches purely on that data. Internally it
//! splits into the same two halves the rest of this codebase's event-driven
//! code uses — a background task that owns the actual (async) broker I/O,
//! and a [`crate::event::Session`] that runs the handler's synchronous
//! state transitions, the two talking over plain channels so the handler
//! itself never has to `.await` anything.

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::broker::{Broker, Delivery};
use crate::equipment::{EquipmentId, PublicationRoutingKey, SubscriptionRoutingKey};
use crate::event::{OnEvent, SendEvent, Session, Timer};
use crate::message::Message;

/// A node's fixed identity and subscription set — the data a subclass would
/// have supplied as class-level constants in a mixin-based design.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub id: EquipmentId,
    pub queue: String,
    pub subscriptions: Vec<SubscriptionRoutingKey>,
}

impl NodeDescriptor {
    /// Queue name `<exchange>.<EquipmentId>`, per §6.
    pub fn new(id: EquipmentId, exchange_name: &str, subscriptions: Vec<SubscriptionRoutingKey>) -> Self {
        Self {
            queue: format!("{exchange_name}.{id}"),
            id,
            subscriptions,
        }
    }
}

/// What the session asks the I/O task to do; the only way a (synchronous)
/// handler or the runtime's own dispatch logic reaches the broker.
pub enum Command {
    Ack(u64),
    Publish(Message),
}

/// Implemented by each node's domain logic (ClockManager, Crontab, Cron's
/// clock-update half, ClockConf). `handle_message` is synchronous: any
/// persistence it performs is a direct, local, bounded DB call, and any
/// outbound message is queued via `send` rather than published inline.
pub trait MessageHandler {
    /// Invoked once, after the final binding completes and consumption has
    /// started. The default does nothing.
    fn handle_startup(&mut self, send: &mut dyn SendEvent<Command>) -> anyhow::Result<()> {
        let _ = send;
        Ok(())
    }

    fn handle_message(
        &mut self,
        routing_key: PublicationRoutingKey,
        message: Message,
        send: &mut dyn SendEvent<Command>,
    ) -> anyhow::Result<()>;

    /// Checked after every `handle_message`/`handle_startup` call; once true,
    /// `run_subscriber` returns `Ok(())` instead of looping forever. Only
    /// ClockConf's single-shot interlock uses this; every long-lived node
    /// keeps the default.
    fn is_done(&self) -> bool {
        false
    }
}

/// Internal sentinel threaded through `anyhow::Error` so `run_subscriber`
/// can tell a deliberate `is_done` exit apart from a real session failure.
#[derive(Debug)]
struct Halted;

impl std::fmt::Display for Halted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("node halted itself")
    }
}

impl std::error::Error for Halted {}

enum NodeEvent {
    Delivery(Delivery),
}

struct NodeState<H> {
    id: EquipmentId,
    handler: H,
    commands: UnboundedSender<Command>,
}

impl<H: MessageHandler> OnEvent<NodeEvent> for NodeState<H> {
    /// Mirrors [`crate::broker::dispatch_delivery`]'s ack policy exactly,
    /// just split across the sync/async boundary: acking (and any outbound
    /// publish the handler decides on) is requested via `self.commands`
    /// rather than awaited inline, since this runs inside the synchronous
    /// session loop.
    fn on_event(&mut self, event: NodeEvent, _timer: &mut dyn Timer<NodeEvent>) -> anyhow::Result<()> {
        let NodeEvent::Delivery(delivery) = event;
        let tag = delivery.delivery_tag;

        let routing_key = match PublicationRoutingKey::parse(&delivery.routing_key_wire) {
            Ok(routing_key) => routing_key,
            Err(err) => {
                let _ = self.commands.send(Command::Ack(tag));
                tracing::warn!(target: "mrcs::node", %err, "malformed routing key, acked and dropped");
                return Ok(());
            }
        };

        if routing_key.source == self.id {
            let _ = self.commands.send(Command::Ack(tag));
            tracing::debug!(target: "mrcs::node", source = %routing_key.source, "self-suppressed, acked and dropped");
            return Ok(());
        }

        let message = match Message::construct_from_callback(routing_key.clone(), &delivery.payload, delivery.origin) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(target: "mrcs::node", %err, "malformed payload, dropped without ack");
                return Ok(());
            }
        };

        match self.handler.handle_message(routing_key, message, &mut self.commands) {
            Ok(()) => {
                let _ = self.commands.send(Command::Ack(tag));
            }
            Err(err) => {
                tracing::warn!(target: "mrcs::node", %err, "handler errored, leaving unacked for redelivery");
            }
        }
        if self.handler.is_done() {
            return Err(Halted.into());
        }
        Ok(())
    }
}

/// Run a subscriber node to completion: connect, declare, bind, consume,
/// dispatch every inbound delivery to `handler`, forever (there is no
/// request-level cancellation in this design; termination is external,
/// e.g. dropping the future or a process signal).
///
/// Self-suppression (ack-then-drop) happens here, uniformly, before the
/// handler ever sees a delivery whose `source` is this node's own identity.
/// The broker-owning I/O task never decides acks itself: it only acks a
/// delivery tag once the synchronous session has told it to, via
/// `Command::Ack`, after deciding self-suppression / payload validity /
/// handler success exactly as `crate::broker::dispatch_delivery` does.
pub async fn run_subscriber<B, H>(mut broker: B, descriptor: NodeDescriptor, mut handler: H) -> anyhow::Result<()>
where
    B: Broker + Send + 'static,
    H: MessageHandler + Send + 'static,
{
    broker.connect().await?;
    broker.subscribe(&descriptor.queue, &descriptor.subscriptions).await?;

    let (commands, mut command_receiver) = unbounded_channel::<Command>();
    let mut session = Session::<NodeEvent>::new();
    let mut event_sender = session.sender();

    // Spawned before `handle_startup` runs, so a startup publish (ClockConf's
    // proposal) is flushed to the broker even if the handler is already done
    // by the time `handle_startup` returns.
    let io_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                delivery = broker.recv() => {
                    match delivery {
                        Ok(Some(delivery)) => {
                            // Acking is the session's call, not this task's: it
                            // happens later, as an explicit `Command::Ack` once
                            // `NodeState::on_event` has synchronously decided
                            // self-suppression / handler success / failure.
                            if event_sender.send(NodeEvent::Delivery(delivery)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(target: "mrcs::node", %err, "recv error");
                        }
                    }
                }
                command = command_receiver.recv() => {
                    match command {
                        Some(Command::Ack(tag)) => {
                            if let Err(err) = broker.ack(tag).await {
                                tracing::warn!(target: "mrcs::node", %err, "ack failed");
                            }
                        }
                        Some(Command::Publish(msg)) => {
                            if let Err(err) = broker.publish(&msg).await {
                                tracing::warn!(target: "mrcs::node", %err, "publish failed");
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = broker.close().await;
    });

    let mut startup_commands = commands.clone();
    handler.handle_startup(&mut startup_commands)?;
    drop(startup_commands);
    if handler.is_done() {
        // Dropping every `Command` sender unblocks the I/O task's select
        // loop (its `command_receiver.recv()` resolves to `None`), so it
        // drains anything `handle_startup` just queued before exiting —
        // no abrupt `.abort()` that would drop a pending publish.
        drop(commands);
        let _ = io_task.await;
        return Ok(());
    }

    let mut state = NodeState {
        id: descriptor.id,
        handler,
        commands,
    };
    let result = session.run(&mut state).await;
    // Drops `state`'s `Command` sender, which unblocks the I/O task's
    // `command_receiver.recv()` (resolves to `None`) so it drains any
    // already-queued ack/publish before its loop exits.
    drop(state);
    let _ = io_task.await;
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is::<Halted>() => Ok(()),
        Err(err) => Err(err),
    }
}
