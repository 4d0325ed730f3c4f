//! Panel-facing side of the broker.
//!
//! The panel is the on-screen UI process (candidate window, toolbar, help).
//! There is exactly one, reached over its own Unix socket and spoken to in
//! the binary transaction format shared with the platform's other
//! front-ends.
//!
//! # Modules
//!
//! - [`transaction`]: typed item codec and frame decoder
//! - [`commands`]: opcode table
//! - [`connection`]: batching, reconnect, inbound queue
//! - [`launcher`]: spawning the panel process

pub mod commands;
pub mod connection;
pub mod launcher;
pub mod transaction;

pub use connection::{FactoryInfo, PanelEndpoint};
pub use launcher::PanelLauncher;
pub use transaction::{Item, Transaction, TransactionDecoder};
