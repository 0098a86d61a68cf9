//! Session context for one scheduled class occurrence.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    /// In-room class; primary channel is RFID scanning.
    Offline,
    /// Remote class; primary channel is live face detection.
    Online,
}

/// Immutable description of one class occurrence being taken. Created when
/// the period begins and terminal once the window elapses or an explicit
/// close is issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub channel: Channel,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Identity ids eligible for attendance in this session.
    pub roster_scope: HashSet<String>,
}

impl SessionContext {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.window_start && t <= self.window_end
    }

    /// Whether an observation timestamp falls within the session bounds
    /// widened by `tolerance` on both sides. Scans slightly before the bell
    /// or slightly after it are still legitimate.
    pub fn within_tolerance(&self, t: DateTime<Utc>, tolerance: Duration) -> bool {
        t >= self.window_start - tolerance && t <= self.window_end + tolerance
    }

    pub fn in_scope(&self, identity_id: &str) -> bool {
        self.roster_scope.contains(identity_id)
    }
}
