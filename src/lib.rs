//! # DXL facade
//!
//! `dxl-facade` is a client-side facade over a publish/subscribe and
//! request/reply message fabric. An application publishes events, listens
//! for events on topics, sends requests to named services and answers
//! requests as a service provider, all through one shared connection.
//!
//! ## Core Modules
//!
//! - `message`: The fabric message model (events, requests, responses, errors).
//! - `fabric`: The boundary to the fabric client library, plus an in-process loopback fabric.
//! - `connection`: The connection manager owning the single fabric session, and request correlation.
//! - `dispatch`: The receive-and-dispatch loop shared by listeners and service providers.
//! - `publisher`, `listener`, `requester`, `service`: The four interaction patterns.
//! - `config`: Loading broker endpoints, certificates and timeouts.
//! - `utils`: The error taxonomy and logging setup.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dxl_facade::{ConnectionManager, FabricConfig, LoopbackHub, Publisher};
//!
//! # async fn run() -> Result<(), dxl_facade::DxlError> {
//! let hub = LoopbackHub::new();
//! let connection = Arc::new(ConnectionManager::new(Arc::new(hub.session())));
//! let publisher = Publisher::new(connection.clone());
//! publisher.connect(&FabricConfig::for_broker("localhost", 8883)).await?;
//! let ack = publisher.publish("/t1", r#"{"k":"v"}"#).await?;
//! println!("{ack}");
//! connection.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod fabric;
pub mod listener;
pub mod message;
pub mod publisher;
pub mod requester;
pub mod service;
pub mod utils;

pub use config::{BrokerEndpoint, CertSettings, FabricConfig, load_config};
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState};
pub use dispatch::{DispatchState, ExitReason};
pub use fabric::{Fabric, FabricError, LoopbackFabric, LoopbackHub, Subscription};
pub use listener::{Listener, MessageCallback};
pub use message::{Message, MessageBody, MessageType};
pub use publisher::{Ack, Publisher};
pub use requester::Requester;
pub use service::{INTERNAL_ERROR_CODE, RequestHandler, ServiceFault, ServiceProvider};
pub use utils::{CallbackError, DxlError};

#[cfg(test)]
mod tests;
