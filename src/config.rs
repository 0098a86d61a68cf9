use chrono::Duration;

/// Tunable thresholds for reconciliation, correlation, and live tracking.
/// Passed explicitly to every component; there is no process-wide config.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Minimum match confidence for a visual detection to count as a
    /// confirmation of the matched identity.
    pub minimum_match_confidence: f64,

    /// Fraction of burst-flagged scans above which a batch requests
    /// secondary verification.
    pub burst_threshold: f64,

    /// Fraction of unknown-credential scans above which a batch requests
    /// secondary verification.
    pub unknown_rate_threshold: f64,

    /// Two scans on the same reader closer than this are counted as a burst.
    pub minimum_inter_scan: Duration,

    /// Scans this far outside the session window are still accepted
    /// (students tap in slightly before the bell).
    pub scan_tolerance: Duration,

    /// Minimum spacing between two detections of the same identity for the
    /// second one to count as a new confirmation.
    pub minimum_spacing: Duration,

    /// Confirmations required before an identity is marked present in a
    /// live session.
    pub required_confirmations: u32,

    /// Default live session window length.
    pub session_window: Duration,

    /// Cap on concurrently tracked identities per session. Detections for
    /// new identities beyond the cap are dropped and counted as overflow.
    pub max_tracked_identities: usize,

    /// Detections older than `last_seen_at` minus this tolerance are
    /// rejected as stale.
    pub jitter_tolerance: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            minimum_match_confidence: 0.6,
            burst_threshold: 0.5,
            unknown_rate_threshold: 0.25,
            minimum_inter_scan: Duration::seconds(2),
            scan_tolerance: Duration::minutes(5),
            minimum_spacing: Duration::seconds(10),
            required_confirmations: 5,
            session_window: Duration::minutes(6),
            max_tracked_identities: 10,
            jitter_tolerance: Duration::seconds(2),
        }
    }
}
