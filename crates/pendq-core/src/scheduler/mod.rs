//! Pending-message scheduling: decides when each endpoint gets its next
//! delivery attempt.
//!
//! One task owns all per-endpoint trigger state; everything else talks
//! to it through a handle. Retries are driven by two wake sources armed
//! together after a failure: a backoff alarm and a connectivity
//! listener. Whichever fires first wins and cancels the other.

pub mod backoff;

mod task;

pub use task::{ArmStatus, Scheduler, SchedulerHandle};
