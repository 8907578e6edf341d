//! Crontab (C8): accepts schedule requests addressed to itself and persists
//! them as cronjobs. If a request carries no explicit `target`, the
//! publisher's own address supplies it (publish-back addressing).

use chrono::DateTime;
use mrcs_messages::CronScheduleWire;

use crate::cronjob::Cronjob;
use crate::db::DbHandle;
use crate::equipment::{EquipmentFilter, EquipmentId, EquipmentType, PublicationRoutingKey};
use crate::event::SendEvent;
use crate::message::Message;
use crate::node::{Command, MessageHandler, NodeDescriptor};

/// Chosen Crontab serial — see the design ledger.
pub const CRONTAB_SERIAL: u16 = 2;

pub fn id() -> EquipmentId {
    EquipmentId::new(EquipmentType::Crn, None, CRONTAB_SERIAL)
}

pub fn descriptor(exchange_name: &str) -> NodeDescriptor {
    NodeDescriptor::new(
        id(),
        exchange_name,
        vec![crate::equipment::SubscriptionRoutingKey::new(
            EquipmentFilter::all(),
            EquipmentFilter::exact(id()),
        )],
    )
}

pub struct CrontabHandler {
    db: DbHandle,
}

impl CrontabHandler {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

impl MessageHandler for CrontabHandler {
    fn handle_message(
        &mut self,
        routing_key: PublicationRoutingKey,
        message: Message,
        _send: &mut dyn SendEvent<Command>,
    ) -> anyhow::Result<()> {
        let wire: CronScheduleWire = serde_json::from_value(message.payload)?;
        let on_datetime: DateTime<chrono::Utc> = wire.on.parse()?;
        let target = match wire.target {
            Some(target) => EquipmentId::parse(&target)?,
            None => routing_key.source,
        };
        Cronjob::new(target, wire.event_id, on_datetime).save(&self.db)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cronjob::Cronjob;
    use crate::event::Void;
    use chrono::TimeZone;

    #[test]
    fn absent_target_defaults_to_the_publisher() {
        let db = DbHandle::open_in_memory().unwrap();
        let mut handler = CrontabHandler::new(db);
        let source = EquipmentId::new(EquipmentType::Sch, None, 1);
        let wire = CronScheduleWire {
            event_id: "abc".into(),
            on: "1930-01-02T06:25:00.000+00:00".into(),
            target: None,
        };
        let message = Message::originate(PublicationRoutingKey::new(source, EquipmentFilter::exact(id())), wire).unwrap();
        let routing_key = message.routing_key.clone();
        handler.handle_message(routing_key, message, &mut Void).unwrap();

        let job = Cronjob::find_next(&handler.db, chrono::Utc::now()).unwrap().unwrap();
        assert_eq!(job.target, source);
        assert_eq!(job.event_id, "abc");
    }

    #[test]
    fn explicit_target_overrides_the_publisher() {
        let db = DbHandle::open_in_memory().unwrap();
        let mut handler = CrontabHandler::new(db);
        let source = EquipmentId::new(EquipmentType::Sch, None, 1);
        let explicit_target = EquipmentId::new(EquipmentType::Omp, None, 7);
        let wire = CronScheduleWire {
            event_id: "abc".into(),
            on: "1930-01-02T06:25:00.000+00:00".into(),
            target: Some(explicit_target.to_string()),
        };
        let message = Message::originate(PublicationRoutingKey::new(source, EquipmentFilter::exact(id())), wire).unwrap();
        let routing_key = message.routing_key.clone();
        handler.handle_message(routing_key, message, &mut Void).unwrap();

        let job = Cronjob::find_next(&handler.db, chrono::Utc::now()).unwrap().unwrap();
        assert_eq!(job.target, explicit_target);
    }

    #[test]
    fn duplicate_schedule_replaces_the_row() {
        let db = DbHandle::open_in_memory().unwrap();
        let target = EquipmentId::new(EquipmentType::Sch, None, 1);
        let on = chrono::Utc.with_ymd_and_hms(1930, 1, 2, 6, 25, 0).unwrap();
        Cronjob::new(target, "abc".into(), on).save(&db).unwrap();
        Cronjob::new(target, "abc".into(), on).save(&db).unwrap();
        assert_eq!(Cronjob::count(&db).unwrap(), 1);
    }
}
