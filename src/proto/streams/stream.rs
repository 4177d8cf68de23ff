use std::collections::VecDeque;

use bytes::Bytes;

use crate::frame::StreamId;
use crate::proto::streams::{FlowControl, State};
use crate::proto::WindowSize;

/// Per-stream bookkeeping: state machine, both flow control windows and the
/// queue of response data waiting for window credit.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,

    pub state: State,

    /// Window governing data we send; replenished by peer WINDOW_UPDATEs.
    pub send_flow: FlowControl,

    /// Window governing data the peer sends; we replenish it.
    pub recv_flow: FlowControl,

    /// Response data waiting on flow control credit.
    pub pending_send: VecDeque<Bytes>,

    /// END_STREAM is queued behind `pending_send`.
    pub pending_eos: bool,

    /// True when the stream sits in the connection's pending-send list.
    pub queued: bool,

    /// Set once the response HEADERS frame has been sent.
    pub sent_headers: bool,

    /// Set once END_STREAM has been sent.
    pub sent_eos: bool,
}

impl Stream {
    pub fn new(id: StreamId, send_window: WindowSize, recv_window: WindowSize) -> Stream {
        Stream {
            id,
            state: State::default(),
            send_flow: FlowControl::new(send_window),
            recv_flow: FlowControl::new(recv_window),
            pending_send: VecDeque::new(),
            pending_eos: false,
            queued: false,
            sent_headers: false,
            sent_eos: false,
        }
    }

    pub fn has_pending_send(&self) -> bool {
        !self.pending_send.is_empty() || self.pending_eos
    }
}
