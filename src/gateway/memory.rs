//! In-memory roster gateway.
//!
//! Useful for embedders that keep the roster in process memory and for
//! tests. The same conditional-write semantics as the SQLite gateway: the
//! check-and-insert for accepted outcomes happens under one lock, so
//! concurrent writers race to exactly one `Committed`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::models::{AttendanceOutcome, Identity};

use super::{RosterGateway, WriteAck};

struct MemoryState {
    by_credential: HashMap<String, Identity>,
    outcomes: Vec<AttendanceOutcome>,
    accepted_pairs: HashSet<(String, String)>,
    unavailable: bool,
}

pub struct MemoryRosterGateway {
    state: Mutex<MemoryState>,
}

impl MemoryRosterGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                by_credential: HashMap::new(),
                outcomes: Vec::new(),
                accepted_pairs: HashSet::new(),
                unavailable: false,
            }),
        }
    }

    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let gateway = Self::new();
        for identity in identities {
            gateway.upsert_identity(identity);
        }
        gateway
    }

    pub fn upsert_identity(&self, identity: Identity) {
        let mut state = self.state.lock().unwrap();
        state
            .by_credential
            .insert(identity.scan_credential.clone(), identity);
    }

    /// Simulate an outage: every gateway call fails until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    fn check_available(state: &MemoryState) -> Result<()> {
        if state.unavailable {
            Err(anyhow!("roster gateway unavailable"))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryRosterGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterGateway for MemoryRosterGateway {
    async fn lookup_by_credential(&self, credential: &str) -> Result<Option<Identity>> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state.by_credential.get(credential).cloned())
    }

    async fn has_accepted_outcome(&self, session_id: &str, identity_id: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state
            .accepted_pairs
            .contains(&(session_id.to_string(), identity_id.to_string())))
    }

    async fn write_outcome(&self, outcome: &AttendanceOutcome) -> Result<WriteAck> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;

        if outcome.is_accepted() {
            let pair = (outcome.session_id.clone(), outcome.identity_id.clone());
            if !state.accepted_pairs.insert(pair) {
                return Ok(WriteAck::Conflict);
            }
        }

        state.outcomes.push(outcome.clone());
        Ok(WriteAck::Committed)
    }

    async fn outcomes_for_session(&self, session_id: &str) -> Result<Vec<AttendanceOutcome>> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state
            .outcomes
            .iter()
            .filter(|o| o.session_id == session_id)
            .cloned()
            .collect())
    }
}
