//! System-wide timer facility for delayed and repeating callbacks.
//!
//! Independent of the per-actor dispatchers. Callbacks should only hand
//! work to actors (a `tell`), never do the work themselves.

use crate::dispatcher::{build_runtime, RuntimeSlot};
use crate::error::Result;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

/// Cancellable handle to a scheduled callback
#[derive(Debug)]
pub struct ScheduledTask {
    abort: AbortHandle,
}

impl ScheduledTask {
    /// Cancel the callback if it has not fired yet (or stop repeating)
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// True once the callback ran to completion or was cancelled
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Timer pool
pub struct Scheduler {
    handle: Handle,
    slot: RuntimeSlot,
}

impl Scheduler {
    pub fn new(pool_size: usize) -> Result<Self> {
        let runtime = build_runtime("actor-scheduler", pool_size)?;
        debug!(pool_size, "Created scheduler");
        Ok(Self {
            handle: runtime.handle().clone(),
            slot: RuntimeSlot::new(Some(runtime)),
        })
    }

    /// Run `callback` once after `delay`
    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        ScheduledTask {
            abort: handle.abort_handle(),
        }
    }

    /// Run `callback` after `initial_delay`, then again `period` after
    /// each run finishes, until cancelled
    pub fn schedule_with_fixed_delay<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        mut callback: F,
    ) -> ScheduledTask
    where
        F: FnMut() + Send + 'static,
    {
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                callback();
                tokio::time::sleep(period).await;
            }
        });
        ScheduledTask {
            abort: handle.abort_handle(),
        }
    }

    pub(crate) fn shutdown(&self, timeout: Duration) {
        self.slot.shutdown(timeout);
    }
}
