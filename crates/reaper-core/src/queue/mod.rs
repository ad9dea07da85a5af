//! Queue module: keyed work queue and retry backoff.
//!
//! Design intent:
//! - One unit of work per policy name; duplicate triggers collapse.
//! - The queue owns ordering and delays; workers only lease and release.

mod memory;
mod retry;

pub use memory::WorkQueue;
pub use retry::RetryPolicy;
