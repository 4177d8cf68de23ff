use std::{error, fmt, io};

use crate::codec::{RecvError, UserError};
use crate::frame::{Reason, StreamId};

/// Represents errors that can occur running an HTTP/2 connection.
#[derive(Debug)]
pub enum Error {
    /// A connection level protocol error; a GOAWAY has been or will be sent.
    Protocol(Reason),

    /// An error affecting a single stream; an RST_STREAM has been or will be
    /// sent.
    Stream {
        /// The stream concerned.
        id: StreamId,
        /// The error code.
        reason: Reason,
    },

    /// An error resulting from an invalid action taken by the user of this
    /// library.
    User(UserError),

    /// An error caused by an action taken by the remote peer's transport.
    Io(io::Error),
}

impl Error {
    /// Returns the HTTP/2 error code, when one applies.
    pub fn reason(&self) -> Option<Reason> {
        match *self {
            Error::Protocol(reason) | Error::Stream { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Error {
        Error::Io(src)
    }
}

impl From<UserError> for Error {
    fn from(src: UserError) -> Error {
        Error::User(src)
    }
}

impl From<Reason> for Error {
    fn from(src: Reason) -> Error {
        Error::Protocol(src)
    }
}

impl From<RecvError> for Error {
    fn from(src: RecvError) -> Error {
        match src {
            RecvError::Connection(reason) => Error::Protocol(reason),
            RecvError::Stream { id, reason } => Error::Stream { id, reason },
            RecvError::Io(e) => Error::Io(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Protocol(ref reason) => write!(fmt, "protocol error: {}", reason),
            Error::Stream { id, ref reason } => {
                write!(fmt, "stream error on stream {:?}: {}", id, reason)
            }
            Error::User(ref e) => write!(fmt, "user error: {}", e),
            Error::Io(ref e) => fmt::Display::fmt(e, fmt),
        }
    }
}

impl error::Error for Error {}
