pub mod batch;
pub mod correlate;

pub use batch::{reconcile_batch, BatchResult, ScanRecord};
pub use correlate::{correlate, CorrelationResult};
