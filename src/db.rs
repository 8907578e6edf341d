//! The persistence layer (C10): an explicit `rusqlite`-backed resource
//! handle, one file per logical store per operating mode.
//!
//! No global/lazy singleton: callers construct a `DbHandle` once at startup
//! and hold it for the node's lifetime; tests build a fresh in-memory handle
//! per test instead of sharing one and calling a teardown.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::config::OperationMode;

/// The only logical store this crate's core ships a schema for. `Admin` and
/// `MessageLog` (named by the design alongside it) are out of scope
/// entirely and have no representation here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbName {
    Cron,
}

impl DbName {
    fn file_stem(self) -> &'static str {
        match self {
            DbName::Cron => "cron",
        }
    }
}

pub struct DbHandle {
    conn: Connection,
}

impl DbHandle {
    /// Open (creating if absent) the database file for `name` under `mode`,
    /// running schema migration. `base_dir` is where `.sqlite3` files live.
    pub fn open(base_dir: &Path, name: DbName, mode: OperationMode) -> anyhow::Result<Self> {
        let path = db_path(base_dir, name, mode);
        let conn = Connection::open(path)?;
        let handle = Self { conn };
        handle.migrate()?;
        Ok(handle)
    }

    /// An isolated in-memory handle, for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let handle = Self { conn };
        handle.migrate()?;
        Ok(handle)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cronjobs_v1 (
                id INTEGER PRIMARY KEY,
                target TEXT NOT NULL,
                event_id TEXT NOT NULL,
                on_datetime TIMESTAMP,
                UNIQUE(target, event_id, on_datetime) ON CONFLICT REPLACE
            );
            CREATE INDEX IF NOT EXISTS cronjobs_v1_id ON cronjobs_v1(id);
            CREATE INDEX IF NOT EXISTS cronjobs_v1_on_datetime ON cronjobs_v1(on_datetime);
            CREATE INDEX IF NOT EXISTS cronjobs_v1_target ON cronjobs_v1(target);

            CREATE TABLE IF NOT EXISTS clock_v1 (
                host TEXT PRIMARY KEY,
                is_running INTEGER NOT NULL,
                speed INTEGER NOT NULL,
                anchor_real TIMESTAMP NOT NULL,
                anchor_model TIMESTAMP NOT NULL,
                tick_interval_secs INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS model_time_v1 (
                host TEXT PRIMARY KEY,
                model_datetime TIMESTAMP NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn db_path(base_dir: &Path, name: DbName, mode: OperationMode) -> PathBuf {
    let suffix = match mode {
        OperationMode::Live => "",
        OperationMode::Test => "_test",
    };
    base_dir.join(format!("{}{suffix}.sqlite3", name.file_stem()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_is_idempotent() {
        let handle = DbHandle::open_in_memory().unwrap();
        handle.migrate().unwrap();
        handle.migrate().unwrap();
    }
}
