//! Typed dispatch errors.
//!
//! Codec and socket plumbing report failures through `anyhow`; this enum
//! is what client dispatch and frame decoding surface. Every variant is a protocol error: the
//! offending connection is closed and the rest of the process keeps running.

use thiserror::Error;

/// A client or panel violated the wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The header does not name any known operation.
    #[error("unknown header '{0}'")]
    UnknownHeader(String),

    /// A required argument is absent.
    #[error("'{header}' is missing argument #{index}")]
    MissingArgument {
        /// Header of the offending message.
        header: String,
        /// Zero-based argument position.
        index: usize,
    },

    /// An argument could not be parsed.
    #[error("'{header}' argument #{index} is invalid: '{value}'")]
    InvalidArgument {
        /// Header of the offending message.
        header: String,
        /// Zero-based argument position.
        index: usize,
        /// Raw argument text.
        value: String,
    },

    /// The context id is not registered.
    #[error("no input context with id {0}")]
    UnknownContext(usize),

    /// The context belongs to a different connection.
    #[error("input context {0} is owned by another connection")]
    NotOwner(usize),

    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    Codec(String),
}

impl ProtocolError {
    /// Wrap an `anyhow` codec failure, keeping its context chain.
    pub fn codec(err: &anyhow::Error) -> Self {
        Self::Codec(format!("{err:#}"))
    }
}
