//! Cronjobs (C8/C9 shared data type): a persisted `(target, event_id,
//! on_datetime)` triple that fires once model time reaches `on_datetime`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::DbHandle;
use crate::equipment::EquipmentId;

#[derive(Debug, Clone, PartialEq)]
pub struct Cronjob {
    pub id: Option<i64>,
    pub target: EquipmentId,
    pub event_id: String,
    pub on_datetime: DateTime<Utc>,
}

impl Cronjob {
    pub fn new(target: EquipmentId, event_id: String, on_datetime: DateTime<Utc>) -> Self {
        Self {
            id: None,
            target,
            event_id,
            on_datetime,
        }
    }

    /// Insert, or replace in place if `(target, event_id, on_datetime)`
    /// already exists (the unique index's `ON CONFLICT REPLACE`). Returns
    /// the job with its row id filled in.
    pub fn save(mut self, db: &DbHandle) -> anyhow::Result<Self> {
        let target = self.target.to_string();
        db.connection().execute(
            "INSERT INTO cronjobs_v1 (target, event_id, on_datetime) VALUES (?1, ?2, ?3)",
            params![target, self.event_id, self.on_datetime],
        )?;
        self.id = Some(db.connection().last_insert_rowid());
        Ok(self)
    }

    /// The earliest still-pending job with `on_datetime <= now`, if any.
    /// Ties are broken by ascending insert id (`ORDER BY on_datetime, id`).
    pub fn find_next(db: &DbHandle, now: DateTime<Utc>) -> anyhow::Result<Option<Self>> {
        let row = db
            .connection()
            .query_row(
                "SELECT id, target, event_id, on_datetime FROM cronjobs_v1
                 WHERE on_datetime <= ?1
                 ORDER BY on_datetime ASC, id ASC
                 LIMIT 1",
                params![now],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, target, event_id, on_datetime)) = row else {
            return Ok(None);
        };
        Ok(Some(Self {
            id: Some(id),
            target: EquipmentId::parse(&target).map_err(|err| anyhow::anyhow!("{err}"))?,
            event_id,
            on_datetime,
        }))
    }

    pub fn delete(db: &DbHandle, id: i64) -> anyhow::Result<()> {
        db.connection()
            .execute("DELETE FROM cronjobs_v1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn count(db: &DbHandle) -> anyhow::Result<i64> {
        db.connection()
            .query_row("SELECT COUNT(*) FROM cronjobs_v1", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbHandle;
    use crate::equipment::EquipmentType;
    use chrono::TimeZone;

    fn db() -> DbHandle {
        DbHandle::open_in_memory().unwrap()
    }

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1930, 1, 2, 6, minute, 0).unwrap()
    }

    #[test]
    fn duplicate_triple_replaces_row_count_unchanged() {
        let db = db();
        let target = EquipmentId::new(EquipmentType::Sch, None, 1);
        Cronjob::new(target, "abc".into(), ts(25)).save(&db).unwrap();
        Cronjob::new(target, "abc".into(), ts(25)).save(&db).unwrap();
        assert_eq!(Cronjob::count(&db).unwrap(), 1);
    }

    #[test]
    fn find_next_orders_by_on_datetime_ascending() {
        let db = db();
        let target = EquipmentId::new(EquipmentType::Sch, None, 1);
        Cronjob::new(target, "late".into(), ts(30)).save(&db).unwrap();
        Cronjob::new(target, "early".into(), ts(10)).save(&db).unwrap();

        let job = Cronjob::find_next(&db, ts(31)).unwrap().unwrap();
        assert_eq!(job.event_id, "early");
    }

    #[test]
    fn find_next_ignores_jobs_not_yet_due() {
        let db = db();
        let target = EquipmentId::new(EquipmentType::Sch, None, 1);
        Cronjob::new(target, "future".into(), ts(59)).save(&db).unwrap();
        assert!(Cronjob::find_next(&db, ts(1)).unwrap().is_none());
    }

    #[test]
    fn delete_removes_exactly_one_row() {
        let db = db();
        let target = EquipmentId::new(EquipmentType::Sch, None, 1);
        let a = Cronjob::new(target, "a".into(), ts(1)).save(&db).unwrap();
        Cronjob::new(target, "b".into(), ts(2)).save(&db).unwrap();
        Cronjob::delete(&db, a.id.unwrap()).unwrap();
        assert_eq!(Cronjob::count(&db).unwrap(), 1);
    }
}
