use crate::timestamp::{get_timestamp, Timestamp, TimestampDuration};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{trace, warn};

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum TickTaskError {
    #[error("tick task already running")]
    AlreadyRunning,
    #[error("tick task routine not set")]
    NoRoutine,
    #[error("tick routine failed: {0}")]
    RoutineFailed(String),
}

type TickTaskRoutine =
    dyn Fn(Timestamp, Timestamp) -> BoxFuture<'static, Result<(), String>> + Send + Sync;

struct TickTaskInner {
    last_timestamp: Option<Timestamp>,
    running: bool,
}

/// A periodic routine that runs at most once per `tick_period`, driven by
/// repeated calls to [`TickTask::tick`] from a single owning loop (the
/// heartbeat ticker, the routing table's steady-state maintenance, etc).
/// Construction is cheap and routine-less; `set_routine` wires in the
/// actual work once the owner exists, and `tick` is the only thing callers
/// invoke repeatedly.
pub struct TickTask {
    tick_period: TimestampDuration,
    inner: Mutex<TickTaskInner>,
    routine: Mutex<Option<Arc<TickTaskRoutine>>>,
}

impl TickTask {
    pub fn new(tick_period_secs: u32) -> Self {
        Self {
            tick_period: TimestampDuration::from_secs(tick_period_secs as u64),
            inner: Mutex::new(TickTaskInner {
                last_timestamp: None,
                running: false,
            }),
            routine: Mutex::new(None),
        }
    }

    pub fn set_routine<F>(&self, routine: F)
    where
        F: Fn(Timestamp, Timestamp) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        *self.routine.lock() = Some(Arc::new(routine));
        trace!("tick task routine set");
    }

    /// Run the routine if enough time has elapsed since the last run and no
    /// invocation is already in flight. Returns `Ok(())` if skipped because
    /// the period hasn't elapsed yet; errors if an invocation is already in
    /// flight, no routine has been set, or the routine itself failed.
    pub async fn tick(&self) -> Result<(), TickTaskError> {
        let cur_ts = get_timestamp();
        let routine = {
            let mut inner = self.inner.lock();
            if inner.running {
                trace!("tick task already running, rejecting overlapping tick");
                return Err(TickTaskError::AlreadyRunning);
            }
            if let Some(last) = inner.last_timestamp {
                if cur_ts.saturating_sub(last) < self.tick_period {
                    return Ok(());
                }
            }
            let routine = self.routine.lock().clone();
            let Some(routine) = routine else {
                return Err(TickTaskError::NoRoutine);
            };
            inner.running = true;
            routine
        };

        let last_ts = self.inner.lock().last_timestamp.unwrap_or(cur_ts);
        trace!("tick task routine starting");
        let result = routine(last_ts, cur_ts).await;

        let mut inner = self.inner.lock();
        inner.running = false;
        inner.last_timestamp = Some(cur_ts);

        result.map_err(|e| {
            warn!(error = %e, "tick task routine failed");
            TickTaskError::RoutineFailed(e)
        })
    }
}
