use std::fmt;
use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream::SelectAll;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::dispatch::control::DispatchControl;
use crate::fabric::Subscription;
use crate::message::Message;
use crate::utils::DxlError;

/// Which component ran the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRole {
    EventListener,
    ServiceProvider,
}

/// Why a listener or service provider returned from `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// `stop` was called.
    Stopped {
        role: DispatchRole,
        topics: Vec<String>,
    },
    /// Receiving failed; the subscription is gone.
    Failed {
        role: DispatchRole,
        topics: Vec<String>,
        error: DxlError,
    },
}

impl ExitReason {
    pub fn is_error(&self) -> bool {
        matches!(self, ExitReason::Failed { .. })
    }

    pub fn error(&self) -> Option<&DxlError> {
        match self {
            ExitReason::Failed { error, .. } => Some(error),
            ExitReason::Stopped { .. } => None,
        }
    }

    pub fn topics(&self) -> &[String] {
        match self {
            ExitReason::Stopped { topics, .. } | ExitReason::Failed { topics, .. } => topics,
        }
    }

    pub(crate) fn from_outcome(
        role: DispatchRole,
        topics: Vec<String>,
        outcome: Result<(), DxlError>,
    ) -> Self {
        match outcome {
            Ok(()) => ExitReason::Stopped { role, topics },
            Err(error) => ExitReason::Failed {
                role,
                topics,
                error,
            },
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (role, topics) = match self {
            ExitReason::Stopped { role, topics } | ExitReason::Failed { role, topics, .. } => {
                (role, topics.join(", "))
            }
        };
        match role {
            DispatchRole::EventListener => {
                write!(f, "Shutting down event listener on topic '{topics}'")?
            }
            DispatchRole::ServiceProvider => {
                write!(f, "Shutting down service provider on topic(s) '{topics}'")?
            }
        }
        if let ExitReason::Failed { error, .. } = self {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}

/// Receive from `inbound` and hand each message to `deliver`, one at a time
/// and in receive order, until the stop signal fires or receiving fails.
///
/// A stop raised while `deliver` is running takes effect once it returns.
pub(crate) async fn run_dispatch<F, Fut>(
    control: &DispatchControl,
    mut stop: watch::Receiver<bool>,
    mut inbound: SelectAll<Subscription>,
    mut deliver: F,
) -> Result<(), DxlError>
where
    F: FnMut(Message) -> Fut,
    Fut: Future<Output = ()>,
{
    control.mark_running();
    loop {
        if *stop.borrow_and_update() {
            debug!("dispatch loop stopped");
            return Ok(());
        }
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            next = inbound.next() => match next {
                Some(Ok(message)) => deliver(message).await,
                Some(Err(e)) => {
                    warn!(error = %e, "subscription failed");
                    return Err(DxlError::Transport(e.to_string()));
                }
                None => {
                    warn!("subscription closed by the fabric");
                    return Err(DxlError::Connection(
                        "subscription closed by the fabric".to_string(),
                    ));
                }
            },
        }
    }
}
