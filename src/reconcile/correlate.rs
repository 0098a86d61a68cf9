//! Secondary verification: correlate a checkpoint image against the roster
//! a session already believes is present.
//!
//! Pure computation over already-fetched data. Given identical inputs the
//! output is identical; repeated runs over the same checkpoint are
//! idempotent and independent of prior calls.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReconcilerConfig;
use crate::models::{AttendanceOutcome, Method, SessionContext, Verdict, VisualDetection};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationResult {
    pub session_id: String,
    /// Accepted identities the checkpoint visually confirmed.
    pub visually_confirmed: HashSet<String>,
    /// Accepted identities with no confident visual match: candidate
    /// proxies, flagged for review.
    pub proxy_suspected: HashSet<String>,
    /// Visually present identities that were never RFID-accepted. Reported,
    /// not penalized.
    pub extra_detected: HashSet<String>,
    /// Total faces the checkpoint contained, matched or not.
    pub scanned_faces: usize,
    pub verified_present: usize,
    /// Advisory outcomes: `proxy-suspected` for unconfirmed accepted
    /// identities, `proxy-cleared` for confirmed ones. None of these ever
    /// retract a primary acceptance.
    pub outcomes: Vec<AttendanceOutcome>,
}

/// Correlate one checkpoint's detections against the accepted roster.
///
/// A single low-confidence checkpoint must not punish a legitimately
/// present student (occlusion and lighting routinely hide faces), so
/// suspicion is advisory: the original accepted outcome stands.
pub fn correlate(
    config: &ReconcilerConfig,
    session: &SessionContext,
    accepted_identities: &HashSet<String>,
    detections: &[VisualDetection],
    decided_at: DateTime<Utc>,
) -> CorrelationResult {
    // Best match score seen for each identity, confident or not; the
    // proxy-suspected confidence is derived from it.
    let mut best_scores: HashMap<&str, f64> = HashMap::new();
    let mut visually_confirmed: HashSet<String> = HashSet::new();

    for detection in detections {
        let Some(identity_id) = detection.matched_identity_id.as_deref() else {
            continue;
        };

        let best = best_scores.entry(identity_id).or_insert(0.0);
        if detection.match_confidence > *best {
            *best = detection.match_confidence;
        }

        if detection.match_confidence >= config.minimum_match_confidence {
            visually_confirmed.insert(identity_id.to_string());
        }
    }

    let proxy_suspected: HashSet<String> = accepted_identities
        .difference(&visually_confirmed)
        .cloned()
        .collect();
    let extra_detected: HashSet<String> = visually_confirmed
        .difference(accepted_identities)
        .cloned()
        .collect();

    // Deterministic output order regardless of set iteration order.
    let mut flagged: Vec<&String> = proxy_suspected.iter().collect();
    flagged.sort();
    let mut cleared: Vec<&String> = accepted_identities
        .intersection(&visually_confirmed)
        .collect();
    cleared.sort();

    let mut outcomes = Vec::with_capacity(flagged.len() + cleared.len());
    for identity_id in flagged {
        let best = best_scores.get(identity_id.as_str()).copied().unwrap_or(0.0);
        outcomes.push(AttendanceOutcome {
            session_id: session.session_id.clone(),
            identity_id: identity_id.clone(),
            method: Method::Secondary,
            confidence: 1.0 - best,
            decided_at,
            verdict: Verdict::ProxySuspected,
        });
    }
    for identity_id in cleared {
        let best = best_scores.get(identity_id.as_str()).copied().unwrap_or(0.0);
        outcomes.push(AttendanceOutcome {
            session_id: session.session_id.clone(),
            identity_id: identity_id.clone(),
            method: Method::Secondary,
            confidence: best,
            decided_at,
            verdict: Verdict::ProxyCleared,
        });
    }

    let verified_present = accepted_identities.len() - proxy_suspected.len();

    CorrelationResult {
        session_id: session.session_id.clone(),
        visually_confirmed,
        proxy_suspected,
        extra_detected,
        scanned_faces: detections.len(),
        verified_present,
        outcomes,
    }
}
