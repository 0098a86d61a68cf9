pub mod event;
pub mod identity;
pub mod outcome;
pub mod session;

pub use event::{ScanEvent, VisualDetection};
pub use identity::{Identity, IdentityStatus, Role};
pub use outcome::{AttendanceOutcome, Method, Verdict};
pub use session::{Channel, SessionContext};
