//! The `service` module answers inbound requests for a named service.

pub mod provider;

pub use provider::{INTERNAL_ERROR_CODE, RequestHandler, ServiceFault, ServiceProvider};

#[cfg(test)]
mod tests;
