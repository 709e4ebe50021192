//! The `utils` module holds the pieces shared by every component: the error
//! taxonomy and logging setup.

pub mod error;
pub mod logging;

pub use error::{CallbackError, DxlError};
