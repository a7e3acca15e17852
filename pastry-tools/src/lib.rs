//! Runtime primitives shared across the pastry workspace: timestamps and
//! periodic tick tasks. Kept dependency-light so `pastry-core` can use it
//! without pulling in a networking stack.

mod tick_task;
mod timestamp;

pub use tick_task::{TickTask, TickTaskError};
pub use timestamp::{get_timestamp, Timestamp, TimestampDuration};

/// Sleep for the given number of milliseconds, regardless of async runtime.
/// `pastry-net` is tokio-only, so this is a thin wrapper, kept here so
/// `pastry-core`'s tests don't need to depend on `pastry-net`.
pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
