//! Recurring background callback, stopped by a condition or on drop.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::JobError;

#[derive(Debug)]
pub struct RepeatedTimer {
    handle: JoinHandle<()>,
}

impl RepeatedTimer {
    /// Spawns a task on the current tokio runtime that calls `callback`
    /// every `interval` for as long as `condition` holds. The first call
    /// happens one interval after start. A zero interval is rejected.
    pub fn start<C, F>(interval: Duration, condition: C, mut callback: F) -> Result<Self, JobError>
    where
        C: Fn() -> bool + Send + 'static,
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(JobError::ZeroInterval);
        }
        let runtime = Handle::try_current().map_err(|_| JobError::NoRuntime)?;
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval() fires immediately once
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !condition() {
                    tracing::debug!("Repeated timer condition no longer holds, stopping");
                    break;
                }
                callback();
            }
        });
        Ok(Self { handle })
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RepeatedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
