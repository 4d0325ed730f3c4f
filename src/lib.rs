//! imbroker - text-input broker daemon.
//!
//! Sits between client processes that host editable text fields, a single
//! on-screen panel process, and composition engines, and routes composition
//! traffic between the three.
//!
//! # Architecture
//!
//! - **Reactor** - poll loop, owns the listener and the broker
//! - **Broker** - owns clients, the panel connection, input contexts and
//!   engine sessions; applies the sharing policy
//! - **Socket** - client line protocol, listener and client endpoints
//! - **Panel** - binary transaction protocol and the panel endpoint
//! - **Engine** - composition capability trait, providers and sessions
//!
//! # Modules
//!
//! - [`reactor`] - readiness loop
//! - [`bridge`] - broker state and dispatch
//! - [`socket`] - client-facing wire and endpoints
//! - [`panel`] - panel-facing wire and endpoint
//! - [`context`] - input contexts and their registry
//! - [`engine`] - engines, providers, sessions
//! - [`config`] - configuration loading

pub mod bridge;
pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod error;
pub mod panel;
pub mod reactor;
pub mod rendezvous;
pub mod socket;

// Re-export commonly used types
pub use bridge::{Broker, SharingPolicy};
pub use config::BrokerConfig;
pub use error::ProtocolError;
pub use reactor::Reactor;
