//! Ingest facade: the surface a thin API layer calls to reach the core.
//!
//! Owns the set of open sessions and their tracker workers. Batch
//! reconciliation and checkpoint correlation are stateless calls routed
//! through here so every channel feeds the same outcome ledger.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::ReconcilerConfig;
use crate::gateway::RosterGateway;
use crate::models::{
    Channel, ScanEvent, SessionContext, Verdict, VisualDetection,
};
use crate::reconcile::{correlate, reconcile_batch, BatchResult, CorrelationResult};
use crate::tracker::{ConfirmationState, ConfirmedPresence, ExpiredTrack, FrameAck, SessionTracker};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// What a closed session settles to, combining live-tracking results with
/// the proxy flags recorded during the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalSettlement {
    pub session_id: String,
    pub confirmed: Vec<ConfirmedPresence>,
    pub expired: Vec<ExpiredTrack>,
    pub proxy_suspected: Vec<String>,
    pub overflow_dropped: u64,
    pub closed_at: DateTime<Utc>,
}

/// Per-session outcome counts, by method and verdict.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub total_outcomes: usize,
    pub accepted_primary: usize,
    pub accepted_visual: usize,
    pub duplicates: usize,
    pub proxy_suspected: usize,
    pub proxy_cleared: usize,
}

struct OpenSession {
    context: SessionContext,
    tracker: Option<SessionTracker>,
}

/// One reconciliation service instance. Sessions are fully independent:
/// each one owns its tracker, and the only shared resource is the gateway.
pub struct AttendanceService<G: RosterGateway> {
    gateway: Arc<G>,
    config: ReconcilerConfig,
    sessions: Mutex<HashMap<String, OpenSession>>,
}

impl<G: RosterGateway> AttendanceService<G> {
    pub fn new(gateway: Arc<G>, config: ReconcilerConfig) -> Self {
        Self {
            gateway,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session for reconciliation. Online sessions get a live
    /// tracker worker for their whole window.
    pub async fn open_session(&self, context: SessionContext) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&context.session_id) {
            bail!("session {} is already open", context.session_id);
        }

        let tracker = match context.channel {
            Channel::Online => Some(SessionTracker::start(
                self.gateway.clone(),
                self.config.clone(),
                context.clone(),
            )),
            Channel::Offline => None,
        };

        log_info!(
            "Opened session {} ({:?} channel, window {} - {})",
            context.session_id,
            context.channel,
            context.window_start,
            context.window_end
        );

        sessions.insert(
            context.session_id.clone(),
            OpenSession { context, tracker },
        );
        Ok(())
    }

    async fn context_of(&self, session_id: &str) -> Result<SessionContext> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|open| open.context.clone())
            .ok_or_else(|| anyhow!("session {session_id} is not open"))
    }

    /// Reconcile one batch of primary-channel scans. Retryable on gateway
    /// outage; re-submission reports duplicates instead of double-accepting.
    pub async fn submit_batch(
        &self,
        session_id: &str,
        events: &[ScanEvent],
    ) -> Result<BatchResult> {
        let context = self.context_of(session_id).await?;
        reconcile_batch(self.gateway.as_ref(), &self.config, &context, events).await
    }

    /// Correlate one checkpoint image against the identities this session
    /// has already accepted, recording advisory proxy verdicts.
    pub async fn submit_checkpoint(
        &self,
        session_id: &str,
        detections: &[VisualDetection],
    ) -> Result<CorrelationResult> {
        let context = self.context_of(session_id).await?;

        let accepted: HashSet<String> = self
            .gateway
            .outcomes_for_session(session_id)
            .await?
            .into_iter()
            .filter(|o| o.is_accepted())
            .map(|o| o.identity_id)
            .collect();

        let result = correlate(&self.config, &context, &accepted, detections, Utc::now());

        for outcome in &result.outcomes {
            // Advisory rows; conflicts cannot happen for non-accepted
            // verdicts, and an outage propagates as retryable.
            self.gateway.write_outcome(outcome).await?;
        }

        log_info!(
            "Checkpoint for session {}: {} faces, {} verified, {} proxy-suspected, {} extra",
            session_id,
            result.scanned_faces,
            result.verified_present,
            result.proxy_suspected.len(),
            result.extra_detected.len()
        );

        Ok(result)
    }

    /// Feed one frame of live detections to the session's tracker.
    pub async fn submit_frame(
        &self,
        session_id: &str,
        detections: Vec<VisualDetection>,
    ) -> Result<FrameAck> {
        let tracker = {
            let sessions = self.sessions.lock().await;
            let open = sessions
                .get(session_id)
                .ok_or_else(|| anyhow!("session {session_id} is not open"))?;
            open.tracker
                .clone()
                .ok_or_else(|| anyhow!("session {session_id} has no live tracker"))?
        };

        tracker.submit_frame(detections).await
    }

    /// Tracking progress for every identity in a live session.
    pub async fn session_progress(&self, session_id: &str) -> Result<Vec<ConfirmationState>> {
        let tracker = {
            let sessions = self.sessions.lock().await;
            let open = sessions
                .get(session_id)
                .ok_or_else(|| anyhow!("session {session_id} is not open"))?;
            open.tracker
                .clone()
                .ok_or_else(|| anyhow!("session {session_id} has no live tracker"))?
        };

        tracker.progress().await
    }

    /// Close a session: settle its tracker (if any) and report everything
    /// the session decided, including proxy suspicions.
    pub async fn close_session(&self, session_id: &str) -> Result<FinalSettlement> {
        let open = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| anyhow!("session {session_id} is not open"))?
        };

        let (confirmed, expired, overflow_dropped, closed_at) = match &open.tracker {
            Some(tracker) => {
                let settlement = tracker.close().await?;
                (
                    settlement.confirmed,
                    settlement.expired,
                    settlement.overflow_dropped,
                    settlement.closed_at,
                )
            }
            None => (Vec::new(), Vec::new(), 0, Utc::now()),
        };

        let mut proxy_suspected: Vec<String> = self
            .gateway
            .outcomes_for_session(session_id)
            .await?
            .into_iter()
            .filter(|o| o.verdict == Verdict::ProxySuspected)
            .map(|o| o.identity_id)
            .collect();
        proxy_suspected.sort();
        proxy_suspected.dedup();

        log_info!(
            "Closed session {}: {} confirmed, {} expired, {} proxy-suspected",
            session_id,
            confirmed.len(),
            expired.len(),
            proxy_suspected.len()
        );

        Ok(FinalSettlement {
            session_id: session_id.to_string(),
            confirmed,
            expired,
            proxy_suspected,
            overflow_dropped,
            closed_at,
        })
    }

    /// Outcome counts for a session, by method and verdict.
    pub async fn session_stats(&self, session_id: &str) -> Result<SessionStats> {
        let outcomes = self.gateway.outcomes_for_session(session_id).await?;

        let mut stats = SessionStats {
            session_id: session_id.to_string(),
            total_outcomes: outcomes.len(),
            accepted_primary: 0,
            accepted_visual: 0,
            duplicates: 0,
            proxy_suspected: 0,
            proxy_cleared: 0,
        };

        for outcome in &outcomes {
            use crate::models::Method;
            match (outcome.verdict, outcome.method) {
                (Verdict::Accepted, Method::Primary) => stats.accepted_primary += 1,
                (Verdict::Accepted, Method::VisualSession) => stats.accepted_visual += 1,
                (Verdict::Duplicate, _) => stats.duplicates += 1,
                (Verdict::ProxySuspected, _) => stats.proxy_suspected += 1,
                (Verdict::ProxyCleared, _) => stats.proxy_cleared += 1,
                _ => {}
            }
        }

        Ok(stats)
    }
}
