use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for SDK operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the SDK.
///
/// The span recording API itself is infallible; these errors come from
/// client construction, header parsing, exporters and lifecycle calls.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Caller supplied a malformed value at the API boundary.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The incoming trace header could not be parsed.
    #[error("malformed trace header: {0}")]
    HeaderParent(String),

    /// The ingestion service rejected a call or was unreachable.
    #[error("remote service error (code {code}): {msg}")]
    RemoteService {
        /// Response envelope code, or `-1` for transport failures.
        code: i32,
        /// Human readable description from the envelope or transport.
        msg: String,
    },

    /// No usable authentication information was configured.
    #[error("authentication info required: {0}")]
    AuthInfoRequired(String),

    /// The configured private key could not be parsed.
    #[error("failed to parse private key: {0}")]
    ParsePrivateKey(String),

    /// A flush or close did not drain the pipeline within its deadline.
    #[error("pipeline did not drain within {0:?}")]
    FlushTimeout(Duration),

    /// The client was already closed.
    #[error("client already closed")]
    AlreadyClosed,

    /// Other errors not covered above.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<String> for Error {
    fn from(err_msg: String) -> Self {
        Error::Other(err_msg.into())
    }
}

impl Error {
    pub(crate) fn remote(code: i32, msg: impl Into<String>) -> Self {
        Error::RemoteService {
            code,
            msg: msg.into(),
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Error::RemoteService {
            code: -1,
            msg: err.to_string(),
        }
    }
}
