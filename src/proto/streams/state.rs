use crate::codec::{RecvError, UserError};
use crate::frame::{Reason, StreamId};

/// Represents the state of an H2 stream
///
/// ```not_rust
///                          send H / recv H
///              Idle ──────────────────────────► Open
///                                                 │
///                recv ES ◄────────────────────────┤─────────► send ES
///                     │                                            │
///                     ▼                                            ▼
///            HalfClosedRemote                              HalfClosedLocal
///                     │                                            │
///                send ES ◄────────── recv ES ─────────────────────┤
///                                        │
///                                        ▼
///                                      Closed
/// ```
///
/// An RST_STREAM, sent or received, moves the stream to `Reset` from any
/// state except `Closed`; `Reset` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
    Reset(Reason),
}

impl State {
    /// Opens the receive-half of the stream when a HEADERS frame is received.
    pub fn recv_open(&mut self, id: StreamId, eos: bool) -> Result<(), RecvError> {
        match *self {
            State::Idle => {
                *self = if eos {
                    State::HalfClosedRemote
                } else {
                    State::Open
                };
                Ok(())
            }
            state => {
                tracing::debug!("recv_open: {:?} in unexpected state {:?}", id, state);
                Err(RecvError::Connection(Reason::PROTOCOL_ERROR))
            }
        }
    }

    /// Indicates that the remote side will not send more data to the local.
    pub fn recv_close(&mut self) -> Result<(), RecvError> {
        match *self {
            State::Open => {
                tracing::trace!("recv_close: Open => HalfClosedRemote");
                *self = State::HalfClosedRemote;
                Ok(())
            }
            State::HalfClosedLocal => {
                tracing::trace!("recv_close: HalfClosedLocal => Closed");
                *self = State::Closed;
                Ok(())
            }
            state => {
                tracing::debug!("recv_close: in unexpected state {:?}", state);
                Err(RecvError::Connection(Reason::PROTOCOL_ERROR))
            }
        }
    }

    /// Opens the send-half of the stream.
    pub fn send_open(&mut self, eos: bool) -> Result<(), UserError> {
        match *self {
            State::Open => {
                if eos {
                    *self = State::HalfClosedLocal;
                }
                Ok(())
            }
            State::HalfClosedRemote => {
                if eos {
                    *self = State::Closed;
                }
                Ok(())
            }
            _ => Err(UserError::UnexpectedFrameType),
        }
    }

    /// Indicates that the local side will not send more data to the remote.
    pub fn send_close(&mut self) {
        match *self {
            State::Open => {
                tracing::trace!("send_close: Open => HalfClosedLocal");
                *self = State::HalfClosedLocal;
            }
            State::HalfClosedRemote => {
                tracing::trace!("send_close: HalfClosedRemote => Closed");
                *self = State::Closed;
            }
            state => panic!("send_close: unexpected state {:?}", state),
        }
    }

    /// The stream was reset, locally or by the peer.
    pub fn set_reset(&mut self, reason: Reason) {
        if !self.is_closed() {
            *self = State::Reset(reason);
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(*self, State::Idle)
    }

    /// Returns true when DATA may still arrive from the peer.
    pub fn is_recv_streaming(&self) -> bool {
        matches!(*self, State::Open | State::HalfClosedLocal)
    }

    /// Returns true when the local side may still send.
    pub fn is_send_streaming(&self) -> bool {
        matches!(*self, State::Open | State::HalfClosedRemote)
    }

    pub fn is_recv_closed(&self) -> bool {
        matches!(
            *self,
            State::Closed | State::Reset(..) | State::HalfClosedRemote
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self, State::Closed | State::Reset(..))
    }

    pub fn is_reset(&self) -> bool {
        matches!(*self, State::Reset(..))
    }
}

impl Default for State {
    fn default() -> State {
        State::Idle
    }
}
