//! Per-session confirmation state and the pure fold that drives it.
//!
//! `SessionProgress` owns every `ConfirmationState` for one session and
//! applies detections to them with no I/O, so the transition rules are
//! testable without a runtime. The worker loop feeds it and acts on the
//! returned effects.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ReconcilerConfig;
use crate::models::{SessionContext, VisualDetection};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrackingStatus {
    Tracking,
    Confirmed,
    Expired,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Tracking => "tracking",
            TrackingStatus::Confirmed => "confirmed",
            TrackingStatus::Expired => "expired",
        }
    }
}

/// Confirmation progress for one identity in one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationState {
    pub identity_id: String,
    pub confirmation_count: u32,
    pub required_count: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub status: TrackingStatus,
    /// Sum of match confidences over counted confirmations; combines with
    /// `confirmation_count` to give the running average.
    #[serde(skip)]
    confidence_sum: f64,
}

impl ConfirmationState {
    pub fn average_confidence(&self) -> f64 {
        if self.confirmation_count == 0 {
            0.0
        } else {
            self.confidence_sum / self.confirmation_count as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedPresence {
    pub identity_id: String,
    pub confirmation_count: u32,
    pub average_confidence: f64,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredTrack {
    pub identity_id: String,
    pub confirmation_count: u32,
    pub required_count: u32,
}

/// Final accounting for one closed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub session_id: String,
    pub confirmed: Vec<ConfirmedPresence>,
    pub expired: Vec<ExpiredTrack>,
    pub overflow_dropped: u64,
    pub closed_at: DateTime<Utc>,
}

/// What one detection did to the session state.
#[derive(Debug, Clone)]
pub enum IngestEffect {
    /// First detection for a new identity; tracking started.
    Tracked,
    /// Spaced detection; confirmation counter incremented.
    Counted,
    /// Detection within the minimum spacing; seen-time refreshed only.
    Unspaced,
    /// The identity crossed its presence threshold.
    Confirmed(ConfirmedPresence),
    /// Identity already confirmed or expired; idempotent no-op.
    AlreadySettled,
    /// Older than the jitter tolerance allows; rejected.
    RejectedStale,
    /// Session closed or detection outside the window; rejected.
    RejectedClosed,
    /// New identity beyond the tracked-identity cap; dropped.
    Overflow,
    /// No identity attached to the face.
    Unmatched,
}

/// All tracking state for one session. Owned exclusively by that session's
/// worker; nothing here is shared.
#[derive(Debug)]
pub struct SessionProgress {
    session_id: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    states: HashMap<String, ConfirmationState>,
    overflow_dropped: u64,
    closed: bool,
    closed_at: Option<DateTime<Utc>>,
}

impl SessionProgress {
    pub fn new(session: &SessionContext) -> Self {
        Self {
            session_id: session.session_id.clone(),
            window_start: session.window_start,
            window_end: session.window_end,
            states: HashMap::new(),
            overflow_dropped: 0,
            closed: false,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn states(&self) -> Vec<ConfirmationState> {
        let mut snapshot: Vec<ConfirmationState> = self.states.values().cloned().collect();
        snapshot.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        snapshot
    }

    /// Fold one detection into the session state.
    pub fn ingest(&mut self, detection: &VisualDetection, config: &ReconcilerConfig) -> IngestEffect {
        let t = detection.observed_at;

        if self.closed || t > self.window_end || t < self.window_start {
            return IngestEffect::RejectedClosed;
        }

        let Some(identity_id) = detection.matched_identity_id.as_deref() else {
            return IngestEffect::Unmatched;
        };

        match self.states.get_mut(identity_id) {
            None => {
                if self.states.len() >= config.max_tracked_identities {
                    self.overflow_dropped += 1;
                    return IngestEffect::Overflow;
                }

                let mut state = ConfirmationState {
                    identity_id: identity_id.to_string(),
                    confirmation_count: 1,
                    required_count: config.required_confirmations,
                    first_seen_at: t,
                    last_seen_at: t,
                    confirmed_at: None,
                    status: TrackingStatus::Tracking,
                    confidence_sum: detection.match_confidence,
                };

                // Degenerate threshold of one confirms on first sight.
                if state.confirmation_count >= state.required_count {
                    state.status = TrackingStatus::Confirmed;
                    state.confirmed_at = Some(t);
                    let presence = presence_of(&state);
                    self.states.insert(identity_id.to_string(), state);
                    return IngestEffect::Confirmed(presence);
                }

                self.states.insert(identity_id.to_string(), state);
                IngestEffect::Tracked
            }
            Some(state) => {
                if state.status != TrackingStatus::Tracking {
                    return IngestEffect::AlreadySettled;
                }

                if t < state.last_seen_at - config.jitter_tolerance {
                    return IngestEffect::RejectedStale;
                }

                if t - state.last_seen_at >= config.minimum_spacing {
                    state.confirmation_count += 1;
                    state.confidence_sum += detection.match_confidence;
                    state.last_seen_at = t;

                    if state.confirmation_count >= state.required_count {
                        state.status = TrackingStatus::Confirmed;
                        state.confirmed_at = Some(t);
                        return IngestEffect::Confirmed(presence_of(state));
                    }
                    return IngestEffect::Counted;
                }

                // A lingering face must not accrue confirmations many times
                // per second, but it still counts as being seen.
                if t > state.last_seen_at {
                    state.last_seen_at = t;
                }
                IngestEffect::Unspaced
            }
        }
    }

    /// Close the session: every identity still tracking expires. Idempotent.
    pub fn close(&mut self, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.closed_at = Some(now);
        for state in self.states.values_mut() {
            if state.status == TrackingStatus::Tracking {
                state.status = TrackingStatus::Expired;
            }
        }
    }

    /// Final accounting. Call after [`close`](Self::close).
    pub fn settlement(&self) -> Settlement {
        let mut confirmed = Vec::new();
        let mut expired = Vec::new();

        for state in self.states() {
            match state.status {
                TrackingStatus::Confirmed => confirmed.push(presence_of(&state)),
                TrackingStatus::Expired => expired.push(ExpiredTrack {
                    identity_id: state.identity_id.clone(),
                    confirmation_count: state.confirmation_count,
                    required_count: state.required_count,
                }),
                TrackingStatus::Tracking => {}
            }
        }

        Settlement {
            session_id: self.session_id.clone(),
            confirmed,
            expired,
            overflow_dropped: self.overflow_dropped,
            closed_at: self.closed_at.unwrap_or(self.window_end),
        }
    }
}

fn presence_of(state: &ConfirmationState) -> ConfirmedPresence {
    ConfirmedPresence {
        identity_id: state.identity_id.clone(),
        confirmation_count: state.confirmation_count,
        average_confidence: state.average_confidence(),
        confirmed_at: state.confirmed_at.unwrap_or(state.last_seen_at),
    }
}
