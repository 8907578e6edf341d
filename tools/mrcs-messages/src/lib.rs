//! Wire-level payload shapes shared between the core crate and, potentially,
//! out-of-process tooling. Kept serde-only and dependency-light so external
//! clients can decode these payloads without pulling in the broker or
//! persistence stack.

use serde::{Deserialize, Serialize};

/// The JSON body published on a Clock update/echo.
///
/// Deliberately thinner than the in-process `Clock` domain type: it carries
/// no `anchor_real` and no `tick_interval`, only what the fleet actually
/// exchanges over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockWire {
    pub is_running: bool,
    pub speed: u8,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

/// The JSON body of a cron schedule request, as published to a Crontab node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronScheduleWire {
    pub event_id: String,
    pub on: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// The JSON body of a fired cronjob, as published by Cron to the job's
/// target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronjobWire {
    pub event_id: String,
    pub on: String,
}
