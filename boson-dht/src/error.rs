//! Error taxonomy
//!
//! Typed failures for every layer of the DHT. Record invariants (signatures,
//! sequence monotonicity) are enforced at the node boundary on both send and
//! receive, so callers never observe an invalid record.

use boson_crypto::CryptoError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Wire-level error codes
pub mod codes {
    /// Generic failure
    pub const GENERIC: i32 = 201;
    /// Malformed message, bad signature, invalid token
    pub const PROTOCOL: i32 = 203;
    /// Sequence-number conflict on a mutable write (monotonicity or CAS)
    pub const SEQUENCE: i32 = 302;
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed identifier text or bytes
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Malformed or schema-violating message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Signature or encryption failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Record that fails its validity predicate
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Write carried a token that verifies against neither secret
    #[error("invalid token")]
    InvalidToken,

    /// Incoming sequence number does not advance the stored one
    #[error("sequence not monotonic: stored {stored}, incoming {incoming}")]
    SequenceNotMonotonic { stored: u32, incoming: u32 },

    /// Compare-and-set expectation missed
    #[error("cas failure: expected {expected}, stored {stored}")]
    CasFail { expected: u32, stored: u32 },

    /// The remote peer answered with a wire error
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    /// Per-call timeout elapsed without a matching response
    #[error("call timed out")]
    Timeout,

    /// Outbound traffic to this host is rate-limited
    #[error("throttled")]
    Throttled,

    /// The call or lookup was canceled
    #[error("canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("storage: {0}")]
    Storage(String),

    #[error("node is not running")]
    NotRunning,

    #[error("{0}")]
    State(String),
}

impl Error {
    /// Wire error code this failure maps to when answering a request
    pub fn wire_code(&self) -> i32 {
        match self {
            Error::SequenceNotMonotonic { .. } | Error::CasFail { .. } => codes::SEQUENCE,
            Error::Protocol(_)
            | Error::InvalidToken
            | Error::InvalidId(_)
            | Error::InvalidRecord(_)
            | Error::Crypto(_) => codes::PROTOCOL,
            _ => codes::GENERIC,
        }
    }
}
