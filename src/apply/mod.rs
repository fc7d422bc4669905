//! Change-set execution: ordering, concurrency, retries, timeouts, and
//! cancellation.

mod engine;
mod report;
mod retry;

pub use engine::{ApplyEngine, ApplyOptions};
pub use report::{ApplyReport, OutcomeStatus, ResourceOutcome};
pub use retry::{call_with_retry, RetryPolicy};
