//! Lifecycle shared by the listener and the service provider.
//!
//! `start` claims the control (`Idle -> Subscribed`), enters the loop
//! (`Running`) and releases it on the way out (`Idle`). The release is tied
//! to the [`Claim`] guard, so a `start` future dropped mid-flight still
//! returns the control to `Idle`.
//!
//! `stop` may be called from any task or thread; it moves the control to
//! `Stopping` and wakes the loop through a watch channel. A stop requested
//! while idle is kept and ends the next `start` as soon as it begins.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::utils::DxlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Subscribed,
    Running,
    Stopping,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Subscribed => "subscribed",
            DispatchState::Running => "running",
            DispatchState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: DispatchState,
    stop_pending: bool,
}

#[derive(Debug)]
pub struct DispatchControl {
    lifecycle: Mutex<Lifecycle>,
    stop: watch::Sender<bool>,
}

impl Default for DispatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchControl {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            lifecycle: Mutex::new(Lifecycle {
                state: DispatchState::Idle,
                stop_pending: false,
            }),
            stop,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> DispatchState {
        self.lock().state
    }

    /// Take ownership of the loop for one `start` call. The control goes
    /// back to `Idle` when the returned guard is dropped.
    pub(crate) fn claim(&self) -> Result<Claim<'_>, DxlError> {
        let mut lifecycle = self.lock();
        if lifecycle.state != DispatchState::Idle {
            return Err(DxlError::AlreadyStarted);
        }
        if std::mem::take(&mut lifecycle.stop_pending) {
            debug!("claimed with a pending stop");
            lifecycle.state = DispatchState::Stopping;
            self.stop.send_replace(true);
        } else {
            lifecycle.state = DispatchState::Subscribed;
            self.stop.send_replace(false);
        }
        Ok(Claim {
            control: self,
            stop: self.stop.subscribe(),
        })
    }

    /// `Subscribed -> Running`. Leaves a pending stop untouched.
    pub(crate) fn mark_running(&self) {
        let mut lifecycle = self.lock();
        if lifecycle.state == DispatchState::Subscribed {
            lifecycle.state = DispatchState::Running;
        }
    }

    fn finish(&self) {
        self.lock().state = DispatchState::Idle;
    }

    /// Ask the loop to exit. Returns `true` when a running `start` was
    /// signalled; otherwise the request is kept for the next `start`.
    pub fn stop(&self) -> bool {
        let mut lifecycle = self.lock();
        match lifecycle.state {
            DispatchState::Subscribed | DispatchState::Running => {
                debug!(from = %lifecycle.state, "stop requested");
                lifecycle.state = DispatchState::Stopping;
                self.stop.send_replace(true);
                true
            }
            DispatchState::Idle => {
                debug!("stop requested while idle, kept for the next start");
                lifecycle.stop_pending = true;
                false
            }
            DispatchState::Stopping => false,
        }
    }
}

/// Held by a `start` call for as long as it owns the loop.
#[derive(Debug)]
pub(crate) struct Claim<'a> {
    control: &'a DispatchControl,
    stop: watch::Receiver<bool>,
}

impl Claim<'_> {
    /// Receiver the loop watches for the stop signal.
    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.clone()
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.control.finish();
    }
}
