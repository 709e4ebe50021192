//! The `dispatch` module holds the receive-and-dispatch machinery shared by
//! [`Listener`](crate::listener::Listener) and
//! [`ServiceProvider`](crate::service::ServiceProvider).

pub mod control;
pub mod runner;

pub use control::{DispatchControl, DispatchState};
pub use runner::{DispatchRole, ExitReason};

pub(crate) use runner::run_dispatch;
