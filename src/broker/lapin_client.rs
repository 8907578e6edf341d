//! The real broker client, backed by `lapin` (AMQP 0-9-1). Implements the
//! reconnect protocol from §4.3: on any transport error the channel is
//! thrown away and everything — exchange, queue, bindings, consumer — is
//! re-declared from scratch before the outstanding operation is retried.
//! There is no retry cap; back-off is a fixed 100ms poll.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};

use super::{Broker, Delivery};
use crate::equipment::SubscriptionRoutingKey;
use crate::message::Message;

const RECONNECT_POLL: Duration = Duration::from_millis(100);

pub struct LapinBroker {
    amqp_uri: String,
    exchange_name: String,
    channel: Option<Channel>,
    consumer: Option<Consumer>,
    queue_name: Option<String>,
    bindings: Vec<SubscriptionRoutingKey>,
    closing: bool,
}

impl LapinBroker {
    pub fn new(amqp_uri: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            amqp_uri: amqp_uri.into(),
            exchange_name: exchange_name.into(),
            channel: None,
            consumer: None,
            queue_name: None,
            bindings: Vec::new(),
            closing: false,
        }
    }

    async fn connect_once(&self) -> anyhow::Result<Channel> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(&self.amqp_uri, properties).await?;
        let channel = connection.create_channel().await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;
        channel
            .exchange_declare(
                &self.exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    /// (Re)declare the queue and bindings this client was last told to
    /// subscribe with, and start a fresh consumer. A no-op if `subscribe`
    /// was never called (a publish-only client).
    async fn declare_queue(&mut self) -> anyhow::Result<()> {
        let Some(queue_name) = self.queue_name.clone() else {
            return Ok(());
        };
        let channel = self.channel.as_ref().expect("channel set before declare_queue");
        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        for binding in &self.bindings {
            channel
                .queue_bind(
                    &queue_name,
                    &self.exchange_name,
                    &binding.format(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }
        let consumer = channel
            .basic_consume(
                &queue_name,
                &format!("{queue_name}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Reconnect and re-declare everything, retrying indefinitely with a
    /// fixed poll delay. Only returns once successful (or if `close` was
    /// called concurrently, in which case it returns early).
    async fn reconnect_loop(&mut self) {
        while !self.closing {
            match self.connect_once().await {
                Ok(channel) => {
                    self.channel = Some(channel);
                    match self.declare_queue().await {
                        Ok(()) => return,
                        Err(err) => {
                            tracing::warn!(target: "mrcs::broker", %err, "re-declare failed, retrying");
                            self.channel = None;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "mrcs::broker", %err, "reconnect failed, retrying");
                }
            }
            tokio::time::sleep(RECONNECT_POLL).await;
        }
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn connect(&mut self) -> anyhow::Result<()> {
        self.reconnect_loop().await;
        Ok(())
    }

    async fn subscribe(&mut self, queue: &str, bindings: &[SubscriptionRoutingKey]) -> anyhow::Result<()> {
        self.queue_name = Some(queue.to_string());
        self.bindings = bindings.to_vec();
        if self.channel.is_none() {
            self.reconnect_loop().await;
            return Ok(());
        }
        if let Err(err) = self.declare_queue().await {
            tracing::warn!(target: "mrcs::broker", %err, "subscribe failed, reconnecting");
            self.channel = None;
            self.reconnect_loop().await;
        }
        Ok(())
    }

    async fn publish(&mut self, msg: &Message) -> anyhow::Result<()> {
        loop {
            if self.channel.is_none() {
                self.reconnect_loop().await;
            }
            let channel = self.channel.as_ref().expect("reconnected");
            let payload = serde_json::to_vec(&msg.payload)?;
            let properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2)
                .with_correlation_id(msg.origin.to_string().into());
            match channel
                .basic_publish(
                    &self.exchange_name,
                    &msg.routing_key.format(),
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await
            {
                Ok(confirm) => {
                    tokio::spawn(async move {
                        match confirm.await {
                            Ok(confirmation) => {
                                tracing::debug!(target: "mrcs::broker", ?confirmation, "publish confirmed")
                            }
                            Err(err) => {
                                tracing::warn!(target: "mrcs::broker", %err, "publish confirm failed")
                            }
                        }
                    });
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(target: "mrcs::broker", %err, "publish failed, reconnecting and retrying");
                    self.channel = None;
                }
            }
        }
    }

    async fn recv(&mut self) -> anyhow::Result<Option<Delivery>> {
        loop {
            if self.consumer.is_none() {
                self.reconnect_loop().await;
            }
            let consumer = self.consumer.as_mut().expect("reconnected");
            match consumer.next().await {
                Some(Ok(delivery)) => {
                    let origin = delivery
                        .properties
                        .correlation_id()
                        .as_ref()
                        .and_then(|id| id.as_str().parse::<uuid::Uuid>().ok())
                        .map(crate::message::Origin)
                        .unwrap_or_else(crate::message::Origin::fresh);
                    return Ok(Some(Delivery {
                        routing_key_wire: delivery.routing_key.to_string(),
                        payload: delivery.data,
                        origin,
                        delivery_tag: delivery.delivery_tag,
                    }));
                }
                Some(Err(err)) => {
                    tracing::warn!(target: "mrcs::broker", %err, "consume failed, reconnecting");
                    self.channel = None;
                    self.consumer = None;
                }
                None => {
                    if self.closing {
                        return Ok(None);
                    }
                    self.channel = None;
                    self.consumer = None;
                }
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> anyhow::Result<()> {
        if let Some(channel) = &self.channel {
            if let Err(err) = channel.basic_ack(delivery_tag, BasicAckOptions::default()).await {
                tracing::warn!(target: "mrcs::broker", %err, "ack failed");
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.closing = true;
        if let Some(channel) = self.channel.take() {
            channel.close(200, "closing").await?;
        }
        self.consumer = None;
        Ok(())
    }

    async fn teardown(&mut self, queue: &str) -> anyhow::Result<()> {
        if self.channel.is_none() {
            self.reconnect_loop().await;
        }
        let channel = self.channel.as_ref().expect("reconnected");
        channel.queue_delete(queue, QueueDeleteOptions::default()).await?;
        Ok(())
    }
}
