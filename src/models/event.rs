//! Raw observation events consumed by the reconciliation core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw primary-channel observation (an RFID tap at a reader). Ephemeral:
/// consumed by the batch reconciler, never retained beyond producing an
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub session_id: String,
    pub scan_credential: String,
    /// Which physical reader produced the scan, when known. Burst detection
    /// is evaluated per reader.
    pub reader_id: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// One visual observation from either a checkpoint image or a live frame.
/// `matched_identity_id` is `None` for a face the matching model could not
/// attribute to anyone on the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualDetection {
    pub session_id: String,
    pub matched_identity_id: Option<String>,
    pub match_confidence: f64,
    pub observed_at: DateTime<Utc>,
    /// Frame number or checkpoint image reference, for audit trails.
    pub frame_ref: Option<String>,
}
