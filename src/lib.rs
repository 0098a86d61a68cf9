//! Attendance reconciliation core.
//!
//! Class attendance arrives through two primary identity channels: RFID
//! scans for in-room classes and per-frame face detections for remote
//! classes. A secondary channel (a one-shot classroom checkpoint image)
//! catches proxy attendance, where a tag is present but its owner is not.
//! This crate reconciles all three:
//!
//! - [`reconcile::reconcile_batch`] turns one batch of raw scan events into
//!   deduplicated, audited outcomes and scores the batch for anomalies;
//! - [`reconcile::correlate`] checks a checkpoint image against the roster
//!   a session already believes is present and flags candidate proxies;
//! - [`tracker::SessionTracker`] follows every identity visible in a live
//!   video session independently until each crosses its presence threshold
//!   or the session window elapses.
//!
//! [`service::AttendanceService`] ties the three together behind the ingest
//! surface a thin API layer would call. The system of record is reached
//! only through the [`gateway::RosterGateway`] trait; a SQLite adapter and
//! an in-memory one are provided.

pub mod config;
pub mod gateway;
pub mod models;
pub mod reconcile;
pub mod service;
pub mod tracker;
pub mod utils;

pub use config::ReconcilerConfig;
pub use gateway::{MemoryRosterGateway, RosterGateway, SqliteRosterGateway, WriteAck};
pub use models::{
    AttendanceOutcome, Channel, Identity, IdentityStatus, Method, Role, ScanEvent,
    SessionContext, Verdict, VisualDetection,
};
pub use reconcile::{reconcile_batch, BatchResult, CorrelationResult};
pub use service::{AttendanceService, FinalSettlement, SessionStats};
pub use tracker::{
    ConfirmationState, ConfirmedPresence, FrameAck, SessionTracker, Settlement, TrackingStatus,
};
pub use utils::logging::init_logging;
