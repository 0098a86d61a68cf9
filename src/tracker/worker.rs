//! The per-session tracker worker.
//!
//! One spawned task owns one session's `SessionProgress`; ingest callers
//! enqueue commands instead of touching state, so per-session ordering is a
//! single-consumer queue and no locking is needed. The window deadline and
//! the cancellation token are the only other wakeups.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration as TokioDuration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::gateway::{RosterGateway, WriteAck};
use crate::models::{AttendanceOutcome, Method, SessionContext, VisualDetection};

use super::state::{ConfirmationState, ConfirmedPresence, IngestEffect, SessionProgress, Settlement};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Result of folding one frame's detections into the session.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAck {
    /// Identities that crossed their presence threshold on this frame.
    pub newly_confirmed: Vec<ConfirmedPresence>,
    pub started_tracking: u32,
    pub counted: u32,
    pub unspaced: u32,
    pub rejected_stale: u32,
    /// Detections arriving after the window or close; rejected, never
    /// silently dropped.
    pub rejected_closed: u32,
    pub overflow_dropped: u32,
    pub unmatched: u32,
}

pub(crate) enum TrackerCommand {
    Frame {
        detections: Vec<VisualDetection>,
        reply: oneshot::Sender<FrameAck>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ConfirmationState>>,
    },
    Close {
        reply: oneshot::Sender<Settlement>,
    },
}

fn deadline_for(session: &SessionContext) -> Instant {
    let remaining = (session.window_end - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    Instant::now() + TokioDuration::from_millis(remaining.as_millis() as u64)
}

pub(crate) async fn tracker_loop<G: RosterGateway>(
    gateway: Arc<G>,
    config: ReconcilerConfig,
    session: SessionContext,
    mut commands: mpsc::Receiver<TrackerCommand>,
    cancel_token: CancellationToken,
) {
    let mut progress = SessionProgress::new(&session);
    let deadline = sleep_until(deadline_for(&session));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                progress.close(Utc::now());
                log_info!("Tracker for session {} cancelled", session.session_id);
                break;
            }
            _ = &mut deadline, if !progress.is_closed() => {
                // Hard deadline: everything still tracking expires. Keep
                // serving commands so late frames get counted rejections
                // and close still yields the settlement.
                progress.close(session.window_end);
                log_info!(
                    "Session {} window elapsed; tracking states expired",
                    session.session_id
                );
            }
            maybe_command = commands.recv() => {
                let Some(command) = maybe_command else {
                    progress.close(Utc::now());
                    break;
                };

                match command {
                    TrackerCommand::Frame { mut detections, reply } => {
                        detections.sort_by_key(|d| d.observed_at);

                        let mut ack = FrameAck::default();
                        for detection in &detections {
                            match progress.ingest(detection, &config) {
                                IngestEffect::Tracked => ack.started_tracking += 1,
                                IngestEffect::Counted => ack.counted += 1,
                                IngestEffect::Unspaced => ack.unspaced += 1,
                                IngestEffect::AlreadySettled => {}
                                IngestEffect::RejectedStale => ack.rejected_stale += 1,
                                IngestEffect::RejectedClosed => ack.rejected_closed += 1,
                                IngestEffect::Overflow => ack.overflow_dropped += 1,
                                IngestEffect::Unmatched => ack.unmatched += 1,
                                IngestEffect::Confirmed(presence) => {
                                    record_confirmation(
                                        gateway.as_ref(),
                                        &session.session_id,
                                        &presence,
                                    )
                                    .await;
                                    ack.newly_confirmed.push(presence);
                                }
                            }
                        }

                        if reply.send(ack).is_err() {
                            log_warn!(
                                "Frame caller for session {} dropped before ack",
                                session.session_id
                            );
                        }
                    }
                    TrackerCommand::Snapshot { reply } => {
                        let _ = reply.send(progress.states());
                    }
                    TrackerCommand::Close { reply } => {
                        progress.close(Utc::now());
                        let _ = reply.send(progress.settlement());
                        break;
                    }
                }
            }
        }
    }
}

/// Write the visual-session acceptance for a freshly confirmed identity.
/// A conflict means another channel already accepted this identity; the
/// confirmation event still stands. A gateway outage is logged rather than
/// crashing the stream; the settlement keeps the confirmed state either way.
async fn record_confirmation<G: RosterGateway>(
    gateway: &G,
    session_id: &str,
    presence: &ConfirmedPresence,
) {
    let outcome = AttendanceOutcome::accepted(
        session_id,
        &presence.identity_id,
        Method::VisualSession,
        presence.average_confidence,
        presence.confirmed_at,
    );

    match gateway.write_outcome(&outcome).await {
        Ok(WriteAck::Committed) => {
            log_info!(
                "Session {}: {} confirmed present ({} confirmations, avg confidence {:.2})",
                session_id,
                presence.identity_id,
                presence.confirmation_count,
                presence.average_confidence
            );
        }
        Ok(WriteAck::Conflict) => {
            log_info!(
                "Session {}: {} already accepted through another channel",
                session_id,
                presence.identity_id
            );
        }
        Err(err) => {
            log_error!(
                "Session {}: failed to record confirmation for {}: {err:?}",
                session_id,
                presence.identity_id
            );
        }
    }
}
