//! Cron (C9): watches virtual time advance and fires due cronjobs.
//!
//! Unlike the other three node kinds, Cron merges two event sources on one
//! task — inbound clock updates and its own paced tick — so it is written
//! as its own loop directly against [`Broker`] rather than through
//! [`crate::node::run_subscriber`]'s synchronous-handler split: there is no
//! sync/async boundary to cross here, both halves already live on the same
//! task.

use std::time::Duration;

use chrono::Utc;
use mrcs_messages::{ClockWire, CronjobWire};

use crate::broker::Broker;
use crate::clock::{self, Clock};
use crate::clock_manager;
use crate::cronjob::Cronjob;
use crate::db::DbHandle;
use crate::equipment::{EquipmentFilter, EquipmentId, EquipmentType, PublicationRoutingKey, SubscriptionRoutingKey};
use crate::message::Message;
use crate::node::NodeDescriptor;
use crate::timer::AsyncIntervalTimer;

/// Chosen Cron serial — see the design ledger.
pub const CRON_SERIAL: u16 = 3;

pub fn id() -> EquipmentId {
    EquipmentId::new(EquipmentType::Crn, None, CRON_SERIAL)
}

pub fn descriptor(exchange_name: &str) -> NodeDescriptor {
    NodeDescriptor::new(
        id(),
        exchange_name,
        vec![SubscriptionRoutingKey::new(
            EquipmentFilter::exact(clock_manager::id()),
            EquipmentFilter::all(),
        )],
    )
}

pub struct CronConfig {
    pub save_model_time: bool,
    pub host: String,
}

/// Run Cron to completion (there is no graceful stop; callers drop the
/// future or signal the process). See §4.7 for the firing algorithm.
pub async fn run<B: Broker>(mut broker: B, descriptor: NodeDescriptor, db: DbHandle, config: CronConfig) -> anyhow::Result<()> {
    broker.connect().await?;
    broker.subscribe(&descriptor.queue, &descriptor.subscriptions).await?;

    let mut prev_model_now = if config.save_model_time {
        clock::model_time::load(&db, &config.host)?
    } else {
        clock::model_time::delete(&db, &config.host)?;
        None
    };

    let mut current_clock: Option<Clock> = None;
    let (mut timer, interval_handle) = AsyncIntervalTimer::new(Duration::from_secs(clock::DEFAULT_TICK_INTERVAL_SECS.into()));

    loop {
        tokio::select! {
            delivery = broker.recv() => {
                let Some(delivery) = delivery? else { break };
                crate::broker::dispatch_delivery(&mut broker, descriptor.id, delivery, |_routing_key, message| {
                    let wire: ClockWire = serde_json::from_value(message.payload)?;
                    let clock = Clock::from_wire(wire, Utc::now())?;
                    interval_handle.set_interval(Duration::from_secs(clock.tick_interval_secs.into()));
                    current_clock = Some(clock);
                    Ok(())
                }).await?;
            }
            _ = timer.next() => {
                let Some(clock) = current_clock else { continue };
                let now = clock.now(Utc::now());
                if Some(now) == prev_model_now {
                    continue;
                }
                prev_model_now = Some(now);
                if config.save_model_time {
                    clock::model_time::save(&db, &config.host, now)?;
                }
                fire_due_jobs(&db, &descriptor, &mut broker, now).await?;
            }
        }
    }
    broker.close().await
}

async fn fire_due_jobs<B: Broker>(
    db: &DbHandle,
    descriptor: &NodeDescriptor,
    broker: &mut B,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    while let Some(job) = Cronjob::find_next(db, now)? {
        let id = job.id.expect("loaded jobs always carry an id");
        let payload = CronjobWire {
            event_id: job.event_id,
            on: job.on_datetime.to_rfc3339(),
        };
        let msg = Message::originate(
            PublicationRoutingKey::new(descriptor.id, EquipmentFilter::exact(job.target)),
            payload,
        )?;
        broker.publish(&msg).await?;
        Cronjob::delete(db, id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::in_process::{Exchange, InProcessBroker};
    use crate::equipment::EquipmentFilter;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    fn clock_wire(minute: u32, speed: u8) -> ClockWire {
        ClockWire {
            is_running: true,
            speed,
            year: 1930,
            month: 1,
            day: 2,
            hour: 6,
            minute,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_due_jobs_in_ascending_order_and_deletes_them() {
        let exchange = Exchange::new();
        let db = DbHandle::open_in_memory().unwrap();
        let target = EquipmentId::new(EquipmentType::Sch, None, 1);
        let due = Utc.with_ymd_and_hms(1930, 1, 2, 6, 20, 0).unwrap();
        Cronjob::new(target, "late".into(), due + chrono::Duration::seconds(5)).save(&db).unwrap();
        Cronjob::new(target, "early".into(), due).save(&db).unwrap();

        let cron_descriptor = descriptor("mrcs.test");
        let cron_broker = InProcessBroker::new(exchange.clone());
        let config = CronConfig {
            save_model_time: false,
            host: "host-a".into(),
        };
        let cron = tokio::spawn(run(cron_broker, cron_descriptor, db, config));

        let mut subscriber = InProcessBroker::new(exchange.clone());
        subscriber.connect().await.unwrap();
        subscriber
            .subscribe(
                "q.sch",
                &[SubscriptionRoutingKey::new(EquipmentFilter::exact(id()), EquipmentFilter::exact(target))],
            )
            .await
            .unwrap();

        let mut publisher = InProcessBroker::new(exchange.clone());
        publisher.connect().await.unwrap();
        let update = Message::originate(
            PublicationRoutingKey::new(clock_manager::id(), EquipmentFilter::all()),
            clock_wire(25, 1),
        )
        .unwrap();
        publisher.publish(&update).await.unwrap();

        tokio::time::sleep(StdDuration::from_secs(2)).await;

        let first = subscriber.recv().await.unwrap().unwrap();
        let first: CronjobWire = serde_json::from_slice(&first.payload).unwrap();
        assert_eq!(first.event_id, "early");

        let second = subscriber.recv().await.unwrap().unwrap();
        let second: CronjobWire = serde_json::from_slice(&second.payload).unwrap();
        assert_eq!(second.event_id, "late");

        cron.abort();
    }
}
