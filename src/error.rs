//! Error taxonomy for the client: local (key/programming), transport
//! (send/recv/poll/timeout), server (protocol-level `SERVER_ERROR`) and
//! fatal (framing violations, connect failure).

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::error::Error as StdError;

/// The observable error code family, mirroring libmc's `MC_RETURN_*`
/// constants. This is what `Client::last_error()` surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    SendErr,
    RecvErr,
    ConnPollErr,
    PollTimeoutErr,
    PollErr,
    McServerErr,
    ProgrammingErr,
    InvalidKeyErr,
    IncompleteBufferErr,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::SendErr => "SEND_ERR",
            ErrorCode::RecvErr => "RECV_ERR",
            ErrorCode::ConnPollErr => "CONN_POLL_ERR",
            ErrorCode::PollTimeoutErr => "POLL_TIMEOUT_ERR",
            ErrorCode::PollErr => "POLL_ERR",
            ErrorCode::McServerErr => "MC_SERVER_ERR",
            ErrorCode::ProgrammingErr => "PROGRAMMING_ERR",
            ErrorCode::InvalidKeyErr => "INVALID_KEY_ERR",
            ErrorCode::IncompleteBufferErr => "INCOMPLETE_BUFFER_ERR",
        };
        write!(f, "{}", s)
    }
}

/// A protocol framing violation: malformed bytes, unexpected magic line,
/// or a response key that does not match anything outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Malformed(String),
    UnexpectedKey(Vec<u8>),
    LoneLineFeed,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed response: {}", msg),
            ProtocolError::UnexpectedKey(key) => write!(
                f,
                "response key {:?} does not match any outstanding request",
                String::from_utf8_lossy(key)
            ),
            ProtocolError::LoneLineFeed => write!(f, "lone \\n without preceding \\r"),
        }
    }
}

/// An error occurring during client communication with memcached.
#[derive(Debug)]
pub enum Error {
    /// The key failed lexical validation (length, forbidden bytes).
    InvalidKey(Vec<u8>),
    /// An error communicating over the wire (send/recv).
    Io(std::io::Error),
    /// An error registering/waiting on the readiness multiplexer.
    Poll(std::io::Error),
    /// The I/O deadline elapsed before all connections finished.
    Timeout,
    /// A framing violation in the ASCII protocol.
    Protocol(ProtocolError),
    /// The server replied `SERVER_ERROR <msg>`.
    ServerError(String),
    /// A (de-)serialization failure in the value codec.
    Codec(bincode::Error),
    /// No live server could be found for a key under failover.
    NoLiveServer,
    /// Caller used a `Client` from a thread other than its owner.
    ThreadUnsafe,
    /// `flush_all` was attempted without explicitly enabling it.
    FlushDisabled,
}

impl Error {
    /// Map this error onto the observable `ErrorCode` family.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidKey(_) => ErrorCode::InvalidKeyErr,
            Error::Io(_) => ErrorCode::SendErr,
            Error::Poll(_) => ErrorCode::PollErr,
            Error::Timeout => ErrorCode::PollTimeoutErr,
            Error::Protocol(_) => ErrorCode::IncompleteBufferErr,
            Error::ServerError(_) => ErrorCode::McServerErr,
            Error::Codec(_) => ErrorCode::ProgrammingErr,
            Error::NoLiveServer => ErrorCode::McServerErr,
            Error::ThreadUnsafe => ErrorCode::ProgrammingErr,
            Error::FlushDisabled => ErrorCode::ProgrammingErr,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Codec(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::InvalidKey(key) => {
                write!(f, "invalid key: {:?}", String::from_utf8_lossy(key))
            }
            Error::Io(err) => write!(f, "IoError: {}", err),
            Error::Poll(err) => write!(f, "PollError: {}", err),
            Error::Timeout => write!(f, "poll_timeout_ms elapsed before all connections finished"),
            Error::Protocol(err) => write!(f, "ProtocolError: {}", err),
            Error::ServerError(msg) => write!(f, "SERVER_ERROR: {}", msg),
            Error::Codec(err) => write!(f, "CodecError: {}", err),
            Error::NoLiveServer => write!(f, "no live server for key under failover"),
            Error::ThreadUnsafe => write!(f, "client used from a thread other than its owner"),
            Error::FlushDisabled => write!(f, "flush_all is disabled; enable it explicitly"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Poll(err) => Some(err),
            Error::Codec(err) => Some(err),
            _ => None,
        }
    }
}
