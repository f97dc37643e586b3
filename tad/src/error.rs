//! The error kinds surfaced by every operation of the engine.
use std::io;

/// The result type of engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced to callers.
///
/// Codec errors never mutate already emitted bytes or
/// enqueued packets, so every variant can be handled by simply discarding the failed operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A template or pattern violates the schema of a layer.
    ///
    /// No I/O has happened when this is returned.
    #[error("template violates the layer schema: {0}")]
    BadTemplate(String),

    /// A field has neither a value in the template nor a send default.
    #[error("field `{field}` has no value and no default")]
    MissingForSend {
        /// The descriptor name of the field.
        field: &'static str,
    },

    /// A pattern did not match this packet.
    ///
    /// The receive loop swallows this and waits for the next packet.
    #[error("pattern did not match at bit offset {bit_offset}")]
    NotMatch {
        /// Offset of the first mismatching field, relative to the layer header.
        bit_offset: usize,
    },

    /// A PDU is shorter than its fixed header.
    #[error("pdu shorter than the fixed header")]
    Truncated,

    /// The codec path is not implemented, e.g. a non-aligned octet string.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// A send queue or the underlying endpoint is out of buffers.
    #[error("out of buffer space")]
    NoBuffer,

    /// A deadline elapsed.
    #[error("deadline elapsed")]
    Timeout,

    /// The endpoint failed.
    #[error("endpoint failure: {0:?}")]
    Io(io::ErrorKind),

    /// A named task, queue or CSAP does not exist.
    #[error("`{0}` not found")]
    NotFound(String),

    /// An internal invariant was violated.
    ///
    /// The CSAP concerned is aborted but the process stays alive.
    #[error("invariant violated: {0}")]
    Fatal(&'static str),

    /// An argument or state transition is not valid, e.g. an unsupported ICMP type or a send on a
    /// receiving CSAP.
    #[error("invalid: {0}")]
    Invalid(String),

    /// An output vector can not hold all segments of a packet.
    #[error("vector too small, {needed} entries required")]
    TooSmall {
        /// The number of entries that would have been required.
        needed: usize,
    },
}

impl Error {
    /// If the error only means that a received packet should be skipped.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Error::NotMatch { .. } | Error::Truncated)
    }

    /// If the error leaves a CSAP unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Fatal(_))
    }

    /// Shift the diagnostic offset of a mismatch by a number of bits.
    pub(crate) fn offset_by(self, bits: usize) -> Self {
        match self {
            Error::NotMatch { bit_offset } => Error::NotMatch { bit_offset: bit_offset + bits },
            other => other,
        }
    }

    pub(crate) fn bad_template(msg: impl Into<String>) -> Self {
        Error::BadTemplate(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            kind => Error::Io(kind),
        }
    }
}
