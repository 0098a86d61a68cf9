//! Roster gateway: the narrow interface to the external system of record.
//!
//! The core never talks to storage directly; it resolves credentials,
//! checks for prior acceptance, and hands finished outcomes to a gateway.
//! The conditional `write_outcome` is the portable contract that keeps the
//! one-accepted-outcome-per-(session, identity) invariant under concurrent
//! reconciliation.

pub mod memory;
pub mod sqlite;

use std::future::Future;

use anyhow::Result;

use crate::models::{AttendanceOutcome, Identity};

pub use memory::MemoryRosterGateway;
pub use sqlite::SqliteRosterGateway;

/// Acknowledgement for an outcome write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAck {
    /// The row is committed.
    Committed,
    /// Another writer already committed an accepted outcome for this
    /// (session, identity) pair. Mapped to a `duplicate` verdict locally,
    /// never treated as a hard failure.
    Conflict,
}

/// Read/write access to the roster and the attendance ledger.
///
/// Any `Err` from these methods means the store is unreachable; callers may
/// safely re-submit the enclosing operation because accepted writes are
/// deduplicated by the conflict check.
pub trait RosterGateway: Send + Sync + 'static {
    /// Resolve a scan credential to an enrolled identity, if any.
    fn lookup_by_credential(
        &self,
        credential: &str,
    ) -> impl Future<Output = Result<Option<Identity>>> + Send;

    /// Whether an accepted outcome already exists for the pair.
    fn has_accepted_outcome(
        &self,
        session_id: &str,
        identity_id: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Persist one outcome. Accepted outcomes are conditional: a second
    /// accepted write for the same pair returns [`WriteAck::Conflict`].
    fn write_outcome(
        &self,
        outcome: &AttendanceOutcome,
    ) -> impl Future<Output = Result<WriteAck>> + Send;

    /// All outcomes recorded for a session, in decision order.
    fn outcomes_for_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<AttendanceOutcome>>> + Send;
}
