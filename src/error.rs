//! Typed errors for the protocol-level decode and data-model boundaries.
//!
//! Internal plumbing (the event loop, broker glue) keeps using
//! `anyhow::Result` the way the rest of this codebase's event handling does;
//! these types exist for the places §9 of the design asks for a taxonomy a
//! caller can match on. They convert into `anyhow::Error` for free via the
//! blanket `std::error::Error` impl.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed routing key: {0}")]
pub struct MalformedKey(pub String);

#[derive(Debug, Error)]
#[error("malformed payload: {0}")]
pub struct MalformedPayload(pub String);

#[derive(Debug, Error)]
#[error("invalid clock config: {0}")]
pub struct InvalidClockConfig(pub String);

/// Named by the taxonomy for completeness, never constructed: every unique
/// index this crate defines is declared `ON CONFLICT REPLACE` (§9 — "accepted
/// by design"), so a conflicting insert always succeeds silently instead of
/// surfacing this error.
#[derive(Debug, Error)]
#[error("persistence conflict: {0}")]
pub struct PersistenceConflict(pub String);
