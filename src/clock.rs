//! The virtual-time clock (C6): an affine mapping from real time to model
//! time.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use mrcs_messages::ClockWire;
use rusqlite::params;

use crate::db::DbHandle;
use crate::error::InvalidClockConfig;

/// Fixed default tick interval used whenever a Clock is rebuilt from the
/// wire, which carries no `tick_interval` field of its own.
pub const DEFAULT_TICK_INTERVAL_SECS: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub is_running: bool,
    pub speed: u8,
    pub anchor_real: DateTime<Utc>,
    pub anchor_model: DateTime<Utc>,
    pub tick_interval_secs: u32,
}

/// The subset of a Clock's fields that are actually carried on the wire,
/// truncated to the minute. Per the design's resolution of the spec's
/// equality ambiguity, two Clocks are considered equal for ClockManager's
/// idempotency check iff this projection matches — never `anchor_real` or
/// `tick_interval`, which the wire doesn't carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireProjection {
    is_running: bool,
    speed: u8,
    model_minute: DateTime<Utc>,
}

impl Clock {
    pub fn new(
        is_running: bool,
        speed: u8,
        anchor_real: DateTime<Utc>,
        anchor_model: DateTime<Utc>,
        tick_interval_secs: u32,
    ) -> Self {
        Self {
            is_running,
            speed: speed.clamp(1, 10),
            anchor_real,
            anchor_model,
            tick_interval_secs,
        }
    }

    /// Decode a Clock from its wire form, anchoring "real now" to the
    /// instant of decode and filling in the fixed default tick interval.
    pub fn from_wire(wire: ClockWire, real_now: DateTime<Utc>) -> Result<Self, InvalidClockConfig> {
        if !(1..=10).contains(&wire.speed) {
            return Err(InvalidClockConfig(format!(
                "speed {} out of range [1,10]",
                wire.speed
            )));
        }
        let anchor_model = Utc
            .with_ymd_and_hms(wire.year, wire.month, wire.day, wire.hour, wire.minute, 0)
            .single()
            .ok_or_else(|| InvalidClockConfig(format!("invalid model datetime in {wire:?}")))?;
        Ok(Self {
            is_running: wire.is_running,
            speed: wire.speed,
            anchor_real: real_now,
            anchor_model,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
        })
    }

    pub fn to_wire(&self) -> ClockWire {
        ClockWire {
            is_running: self.is_running,
            speed: self.speed,
            year: self.anchor_model.year(),
            month: self.anchor_model.month(),
            day: self.anchor_model.day(),
            hour: self.anchor_model.hour(),
            minute: self.anchor_model.minute(),
        }
    }

    /// The current model time, given the stored anchor and speed.
    pub fn now(&self, real_now: DateTime<Utc>) -> DateTime<Utc> {
        if !self.is_running {
            return self.anchor_model;
        }
        let elapsed_real = real_now - self.anchor_real;
        self.anchor_model + elapsed_real * i32::from(self.speed)
    }

    pub fn tick_interval(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.tick_interval_secs.into())
    }

    fn wire_projection(&self) -> WireProjection {
        let truncated = self
            .anchor_model
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(self.anchor_model);
        WireProjection {
            is_running: self.is_running,
            speed: self.speed,
            model_minute: truncated,
        }
    }

    /// Load the Clock persisted for `host`, if any. The Clock is the fleet's
    /// single authoritative row, keyed by host identity.
    pub fn load(db: &DbHandle, host: &str) -> anyhow::Result<Option<Self>> {
        use rusqlite::OptionalExtension;
        db.connection()
            .query_row(
                "SELECT is_running, speed, anchor_real, anchor_model, tick_interval_secs
                 FROM clock_v1 WHERE host = ?1",
                params![host],
                |row| {
                    Ok(Self {
                        is_running: row.get(0)?,
                        speed: row.get(1)?,
                        anchor_real: row.get(2)?,
                        anchor_model: row.get(3)?,
                        tick_interval_secs: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Persist this Clock as `host`'s row, replacing whatever was there.
    pub fn save(&self, db: &DbHandle, host: &str) -> anyhow::Result<()> {
        db.connection().execute(
            "INSERT INTO clock_v1 (host, is_running, speed, anchor_real, anchor_model, tick_interval_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(host) DO UPDATE SET
                is_running = excluded.is_running,
                speed = excluded.speed,
                anchor_real = excluded.anchor_real,
                anchor_model = excluded.anchor_model,
                tick_interval_secs = excluded.tick_interval_secs",
            params![
                host,
                self.is_running,
                self.speed,
                self.anchor_real,
                self.anchor_model,
                self.tick_interval_secs
            ],
        )?;
        Ok(())
    }
}

/// Model-time persistence (§4.7): when a Cron node is configured to save
/// model time, `clock.now()` is written here on every distinct tick, and
/// reloaded at startup so scheduling resumes from where the virtual clock
/// was last observed.
pub mod model_time {
    use super::*;
    use rusqlite::OptionalExtension;

    pub fn load(db: &DbHandle, host: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        db.connection()
            .query_row(
                "SELECT model_datetime FROM model_time_v1 WHERE host = ?1",
                params![host],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn save(db: &DbHandle, host: &str, model_datetime: DateTime<Utc>) -> anyhow::Result<()> {
        db.connection().execute(
            "INSERT INTO model_time_v1 (host, model_datetime) VALUES (?1, ?2)
             ON CONFLICT(host) DO UPDATE SET model_datetime = excluded.model_datetime",
            params![host, model_datetime],
        )?;
        Ok(())
    }

    pub fn delete(db: &DbHandle, host: &str) -> anyhow::Result<()> {
        db.connection()
            .execute("DELETE FROM model_time_v1 WHERE host = ?1", params![host])?;
        Ok(())
    }
}

/// Equality is defined over the wire-carried projection only; see
/// [`Clock::wire_projection`].
impl PartialEq for Clock {
    fn eq(&self, other: &Self) -> bool {
        self.wire_projection() == other.wire_projection()
    }
}
impl Eq for Clock {}
