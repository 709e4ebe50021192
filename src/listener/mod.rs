//! The `listener` module delivers events on a topic to a caller-supplied
//! callback.

pub mod listener;

pub use listener::{Listener, MessageCallback};
