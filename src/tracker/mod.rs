pub mod controller;
pub mod state;
pub mod worker;

pub use controller::SessionTracker;
pub use state::{
    ConfirmationState, ConfirmedPresence, ExpiredTrack, IngestEffect, SessionProgress,
    Settlement, TrackingStatus,
};
pub use worker::FrameAck;
