use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::gateway::RosterGateway;
use crate::models::{SessionContext, VisualDetection};

use super::state::{ConfirmationState, Settlement};
use super::worker::{tracker_loop, FrameAck, TrackerCommand};

const COMMAND_QUEUE_DEPTH: usize = 64;

/// Handle to one session's tracker worker. Cheap to clone; all clones talk
/// to the same spawned loop.
#[derive(Clone)]
pub struct SessionTracker {
    session_id: String,
    commands: mpsc::Sender<TrackerCommand>,
    cancel_token: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionTracker {
    /// Spawn the tracker worker for one session and return its handle.
    pub fn start<G: RosterGateway>(
        gateway: Arc<G>,
        config: ReconcilerConfig,
        session: SessionContext,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let cancel_token = CancellationToken::new();
        let session_id = session.session_id.clone();

        let handle = tokio::spawn(tracker_loop(
            gateway,
            config,
            session,
            command_rx,
            cancel_token.clone(),
        ));

        Self {
            session_id,
            commands: command_tx,
            cancel_token,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fold one frame of detections into the session, returning newly
    /// confirmed identities and rejection counts.
    pub async fn submit_frame(&self, detections: Vec<VisualDetection>) -> Result<FrameAck> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(TrackerCommand::Frame {
                detections,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("session {} tracker is closed", self.session_id))?;

        reply_rx
            .await
            .with_context(|| format!("session {} tracker dropped the frame", self.session_id))
    }

    /// Current confirmation state for every tracked identity.
    pub async fn progress(&self) -> Result<Vec<ConfirmationState>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(TrackerCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| anyhow!("session {} tracker is closed", self.session_id))?;

        reply_rx
            .await
            .with_context(|| format!("session {} tracker dropped the snapshot", self.session_id))
    }

    /// Close the session and return its settlement: remaining tracking
    /// states expire, and the worker exits.
    pub async fn close(&self) -> Result<Settlement> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(TrackerCommand::Close { reply: reply_tx })
            .await
            .map_err(|_| anyhow!("session {} tracker already closed", self.session_id))?;

        let settlement = reply_rx
            .await
            .with_context(|| format!("session {} tracker exited before settling", self.session_id))?;

        if let Some(handle) = self.worker.lock().await.take() {
            handle
                .await
                .context("tracker worker task failed to join")?;
        }

        Ok(settlement)
    }

    /// Terminate immediately without waiting for a settlement (teacher ends
    /// class and walks away). Further detections are rejected.
    pub async fn abort(&self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}
