//! The `error` module defines the error taxonomy surfaced to callers of the
//! facade.
//!
//! Single-shot operations (`connect`, `publish`, `send_request`) return these
//! directly. Failures inside a running listener or service provider are
//! isolated per message and only surface through logs or `ExitReason`.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DxlError {
    /// A session could not be established or maintained.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not connected to a fabric broker")]
    NotConnected,

    #[error("subscription error on '{topic}': {detail}")]
    Subscription { topic: String, detail: String },

    /// A send was refused at the fabric boundary.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no response to request {request_id} within {timeout:?}")]
    Timeout {
        request_id: String,
        timeout: Duration,
    },

    /// The remote side answered with an error message.
    #[error("remote service error {code}: {text}")]
    RemoteService { code: String, text: String },

    #[error("callback error: {0}")]
    Callback(String),

    #[error("already started")]
    AlreadyStarted,
}

impl DxlError {
    pub fn subscription(topic: impl Into<String>, detail: impl ToString) -> Self {
        Self::Subscription {
            topic: topic.into(),
            detail: detail.to_string(),
        }
    }

    /// Numeric error code reported to embedding hosts.
    pub fn code(&self) -> u32 {
        match self {
            DxlError::Connection(_) => 1000,
            DxlError::Transport(_)
            | DxlError::Timeout { .. }
            | DxlError::RemoteService { .. }
            | DxlError::Callback(_) => 1010,
            DxlError::NotConnected => 1200,
            DxlError::AlreadyStarted => 2000,
            DxlError::Subscription { .. } => 2200,
        }
    }
}

/// Failure reported by a registered message callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl From<&str> for CallbackError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CallbackError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<CallbackError> for DxlError {
    fn from(value: CallbackError) -> Self {
        DxlError::Callback(value.0)
    }
}
