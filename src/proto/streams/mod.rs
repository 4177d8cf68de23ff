mod flow_control;
mod state;
mod store;
mod stream;

pub use self::flow_control::FlowControl;
pub use self::state::State;
pub use self::stream::Stream;

use std::collections::VecDeque;

use bytes::Bytes;

use crate::codec::{RecvError, UserError};
use crate::frame::{self, Frame, Reason, StreamId};
use crate::proto::{Config, Event, WindowSize, DEFAULT_INITIAL_WINDOW_SIZE};

use self::store::Store;

/// Manages the state of all streams multiplexed on one connection: creation,
/// state transitions, both directions of flow control and the queue of
/// streams parked on window credit.
#[derive(Debug)]
pub struct Streams {
    store: Store,

    /// The highest peer-initiated stream id seen so far.
    last_peer_stream_id: StreamId,

    /// Initial send window for new streams; owned by the peer's
    /// INITIAL_WINDOW_SIZE setting.
    init_send_window: WindowSize,

    /// Initial receive window for new streams; our own setting.
    init_recv_window: WindowSize,

    /// Connection level windows.
    conn_send_flow: FlowControl,
    conn_recv_flow: FlowControl,

    /// The level the connection receive window is restored to.
    conn_recv_target: WindowSize,

    /// Once a receive window sinks to this level, it is refilled.
    refill_threshold: WindowSize,

    /// Our cap on concurrently active peer-initiated streams.
    max_recv_streams: usize,

    /// The peer's cap on streams we initiate. Unused without push, but the
    /// value is remembered.
    max_send_streams: usize,

    /// Streams holding data parked on flow control, in arrival order.
    pending_send: VecDeque<StreamId>,
}

impl Streams {
    pub fn new(config: &Config) -> Streams {
        Streams {
            store: Store::new(),
            last_peer_stream_id: StreamId::zero(),
            init_send_window: DEFAULT_INITIAL_WINDOW_SIZE,
            init_recv_window: config.initial_window_size,
            conn_send_flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE),
            conn_recv_flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE),
            conn_recv_target: config
                .initial_connection_window_size
                .max(DEFAULT_INITIAL_WINDOW_SIZE),
            refill_threshold: config.max_frame_size,
            max_recv_streams: config.max_concurrent_streams.unwrap_or(u32::MAX) as usize,
            max_send_streams: usize::MAX,
            pending_send: VecDeque::new(),
        }
    }

    pub fn last_peer_stream_id(&self) -> StreamId {
        self.last_peer_stream_id
    }

    /// The number of streams that have not fully closed.
    pub fn active(&self) -> usize {
        self.store.ids_where(|s| !s.state.is_closed()).len()
    }

    pub fn all_closed(&self) -> bool {
        self.active() == 0
    }

    // ===== receive paths =====

    /// Process a received HEADERS frame, opening a stream or closing it with
    /// trailers.
    pub fn recv_headers(
        &mut self,
        frame: frame::Headers,
        accepting: bool,
    ) -> Result<Option<Event>, RecvError> {
        let id = frame.stream_id();
        let eos = frame.is_end_stream();

        if let Some(stream) = self.store.find_mut(id) {
            if stream.state.is_reset() {
                return Ok(None);
            }

            // A header block on an open stream can only be trailers, and
            // trailers must end the stream.
            if !stream.state.is_recv_streaming() || !frame.is_trailers() || !eos {
                tracing::debug!(
                    "connection error PROTOCOL_ERROR -- HEADERS in state {:?}",
                    stream.state
                );
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }

            stream.state.recv_close()?;
            let (_, fields) = frame.into_parts();
            return Ok(Some(Event::Trailers {
                stream_id: id,
                fields,
            }));
        }

        // Peer-initiated streams must be odd and strictly increasing.
        if !id.is_client_initiated() || id <= self.last_peer_stream_id {
            tracing::debug!(
                "connection error PROTOCOL_ERROR -- invalid HEADERS stream id {:?}",
                id
            );
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        if !accepting {
            // Going away; new streams are silently discarded.
            tracing::trace!("ignoring HEADERS on {:?} while going away", id);
            return Ok(None);
        }

        if self.active() >= self.max_recv_streams {
            return Err(RecvError::Stream {
                id,
                reason: Reason::REFUSED_STREAM,
            });
        }

        self.last_peer_stream_id = id;

        let mut stream = Stream::new(id, self.init_send_window, self.init_recv_window);
        stream.state.recv_open(id, eos)?;
        self.store.insert(id, stream);

        let request = frame.into_request().map_err(|_| RecvError::Stream {
            id,
            reason: Reason::PROTOCOL_ERROR,
        })?;

        Ok(Some(Event::Request {
            stream_id: id,
            request,
            end_of_stream: eos,
        }))
    }

    /// Process a received DATA frame: account both windows, refill them as
    /// they drain and surface the payload.
    pub fn recv_data(
        &mut self,
        frame: frame::Data,
    ) -> Result<(Option<Event>, Vec<Frame>), RecvError> {
        let id = frame.stream_id();
        let sz = frame.flow_len() as WindowSize;
        let mut out = Vec::new();

        // Connection window first; a violation here is fatal to the
        // connection.
        self.conn_recv_flow
            .recv_data(sz)
            .map_err(RecvError::Connection)?;

        if self.conn_recv_flow.available() <= self.refill_threshold {
            let inc = self.conn_recv_flow.refill_to(self.conn_recv_target);
            if inc > 0 {
                out.push(frame::WindowUpdate::new(StreamId::zero(), inc).into());
            }
        }

        let init_recv_window = self.init_recv_window;
        let refill_threshold = self.refill_threshold;

        let stream = match self.store.find_mut(id) {
            Some(stream) => stream,
            None => {
                tracing::debug!("connection error PROTOCOL_ERROR -- DATA on idle stream");
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }
        };

        if stream.state.is_reset() {
            // The stream was reset locally; the peer may not know yet.
            // Window credit has been consumed, discard quietly.
            return Ok((None, out));
        }

        if !stream.state.is_recv_streaming() {
            return Err(RecvError::Stream {
                id,
                reason: Reason::STREAM_CLOSED,
            });
        }

        stream
            .recv_flow
            .recv_data(sz)
            .map_err(|reason| RecvError::Stream { id, reason })?;

        let eos = frame.is_end_stream();

        if eos {
            stream.state.recv_close()?;
        } else if stream.recv_flow.available() <= refill_threshold {
            let inc = stream.recv_flow.refill_to(init_recv_window);
            if inc > 0 {
                out.push(frame::WindowUpdate::new(id, inc).into());
            }
        }

        let event = Event::Data {
            stream_id: id,
            data: frame.into_payload(),
            end_of_stream: eos,
        };

        Ok((Some(event), out))
    }

    /// Process a received WINDOW_UPDATE, replenishing windows and draining
    /// any data that was parked on them.
    pub fn recv_window_update(
        &mut self,
        frame: frame::WindowUpdate,
        max_frame: usize,
    ) -> Result<Vec<Frame>, RecvError> {
        let id = frame.stream_id();
        let inc = frame.size_increment();

        if id.is_zero() {
            if inc == 0 {
                // A zero increment on the connection is ignored.
                return Ok(Vec::new());
            }

            self.conn_send_flow
                .inc_window(inc)
                .map_err(RecvError::Connection)?;

            return Ok(self.drain_pending(max_frame));
        }

        // A zero increment on a stream is a stream error.
        if inc == 0 {
            return Err(RecvError::Stream {
                id,
                reason: Reason::PROTOCOL_ERROR,
            });
        }

        match self.store.find_mut(id) {
            Some(stream) => {
                stream
                    .send_flow
                    .inc_window(inc)
                    .map_err(|reason| RecvError::Stream { id, reason })?;
            }
            // WINDOW_UPDATE may race stream teardown; ignore.
            None => return Ok(Vec::new()),
        }

        Ok(self.pump(id, max_frame))
    }

    /// The peer reset a stream.
    pub fn recv_reset(&mut self, frame: frame::Reset) -> Option<Event> {
        let stream = self.store.find_mut(frame.stream_id())?;

        if stream.state.is_closed() {
            return None;
        }

        stream.state.set_reset(frame.reason());
        stream.pending_send.clear();
        stream.pending_eos = false;

        Some(Event::Reset {
            stream_id: frame.stream_id(),
            reason: frame.reason(),
        })
    }

    /// The peer told us to go away: abort every stream above the last one it
    /// promises to process.
    pub fn recv_go_away(&mut self, last_stream_id: StreamId) -> Vec<Event> {
        let ids = self
            .store
            .ids_where(|s| s.id > last_stream_id && !s.state.is_closed());

        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            let stream = self.store.find_mut(id).expect("stream just listed");
            stream.state.set_reset(Reason::REFUSED_STREAM);
            stream.pending_send.clear();
            stream.pending_eos = false;
            events.push(Event::Reset {
                stream_id: id,
                reason: Reason::REFUSED_STREAM,
            });
        }
        events
    }

    /// Tear down every stream after a connection level failure.
    pub fn handle_error(&mut self, reason: Reason) -> Vec<Event> {
        let ids = self.store.ids_where(|s| !s.state.is_closed());
        let mut events = Vec::with_capacity(ids.len());

        for id in ids {
            let stream = self.store.find_mut(id).expect("stream just listed");
            stream.state.set_reset(reason);
            stream.pending_send.clear();
            stream.pending_eos = false;
            events.push(Event::Reset {
                stream_id: id,
                reason,
            });
        }
        self.pending_send.clear();
        events
    }

    /// Mark a stream locally reset (an RST_STREAM is being sent for it).
    pub fn send_reset(&mut self, id: StreamId, reason: Reason) {
        if let Some(stream) = self.store.find_mut(id) {
            stream.state.set_reset(reason);
            stream.pending_send.clear();
            stream.pending_eos = false;
        }
    }

    /// Apply the settings the peer just sent.
    pub fn apply_remote_settings(&mut self, settings: &frame::Settings) {
        if let Some(val) = settings.initial_window_size() {
            let old = self.init_send_window;
            let delta = val as i64 - old as i64;
            self.init_send_window = val;

            // The change applies retroactively to all existing streams.
            self.store
                .for_each(|stream| stream.send_flow.apply_delta(delta as i32));
        }

        if let Some(val) = settings.max_concurrent_streams() {
            self.max_send_streams = val as usize;
        }
    }

    // ===== send paths =====

    /// Validate that response headers may be sent on the stream.
    pub fn send_headers(&mut self, id: StreamId, eos: bool) -> Result<(), UserError> {
        let stream = self
            .store
            .find_mut(id)
            .ok_or(UserError::InactiveStreamId)?;

        if stream.state.is_reset() {
            return Err(UserError::InactiveStreamId);
        }

        stream.state.send_open(eos)?;
        stream.sent_headers = true;
        if eos {
            stream.sent_eos = true;
        }

        Ok(())
    }

    /// Queue response data, emitting as much as current windows allow.
    pub fn send_data(
        &mut self,
        id: StreamId,
        data: Bytes,
        max_frame: usize,
    ) -> Result<Vec<Frame>, UserError> {
        {
            let stream = self
                .store
                .find_mut(id)
                .ok_or(UserError::InactiveStreamId)?;

            if stream.state.is_reset() {
                return Err(UserError::InactiveStreamId);
            }

            if !stream.state.is_send_streaming() || stream.sent_eos || stream.pending_eos {
                return Err(UserError::UnexpectedFrameType);
            }

            stream.pending_send.push_back(data);
        }

        Ok(self.pump(id, max_frame))
    }

    /// Queue end-of-stream, flushed once all pending data has drained.
    pub fn send_eos(&mut self, id: StreamId, max_frame: usize) -> Result<Vec<Frame>, UserError> {
        {
            let stream = self
                .store
                .find_mut(id)
                .ok_or(UserError::InactiveStreamId)?;

            if stream.state.is_reset() {
                return Err(UserError::InactiveStreamId);
            }

            if !stream.state.is_send_streaming() || stream.sent_eos || stream.pending_eos {
                return Err(UserError::UnexpectedFrameType);
            }

            stream.pending_eos = true;
        }

        Ok(self.pump(id, max_frame))
    }

    /// Emit as many DATA frames for `id` as both windows allow, parking the
    /// remainder.
    fn pump(&mut self, id: StreamId, max_frame: usize) -> Vec<Frame> {
        let mut out = Vec::new();
        let mut requeue = false;

        {
            let conn = &mut self.conn_send_flow;
            let stream = match self.store.find_mut(id) {
                Some(stream) => stream,
                None => return out,
            };

            loop {
                if stream.state.is_reset() {
                    stream.pending_send.clear();
                    stream.pending_eos = false;
                    break;
                }

                let front = match stream.pending_send.front_mut() {
                    Some(front) => front,
                    None => {
                        if stream.pending_eos && !stream.sent_eos {
                            // A zero-length END_STREAM frame consumes no
                            // window credit.
                            let mut frame = frame::Data::new(id, Bytes::new());
                            frame.set_end_stream(true);
                            stream.pending_eos = false;
                            stream.sent_eos = true;
                            stream.state.send_close();
                            out.push(frame.into());
                        }
                        break;
                    }
                };

                let window = stream.send_flow.available().min(conn.available()) as usize;
                if window == 0 {
                    tracing::trace!("pump; stream {:?} stalled on flow control", id);
                    break;
                }

                let len = front.len().min(window).min(max_frame);
                let chunk = front.split_to(len);
                if front.is_empty() {
                    stream.pending_send.pop_front();
                }

                stream.send_flow.send_data(len as WindowSize);
                conn.send_data(len as WindowSize);

                out.push(frame::Data::new(id, chunk).into());
            }

            if stream.has_pending_send() && !stream.queued && !stream.state.is_reset() {
                stream.queued = true;
                requeue = true;
            }
        }

        if requeue {
            self.pending_send.push_back(id);
        }

        out
    }

    /// Drain every stream parked on flow control, in arrival order.
    pub fn drain_pending(&mut self, max_frame: usize) -> Vec<Frame> {
        let mut out = Vec::new();

        for _ in 0..self.pending_send.len() {
            let id = match self.pending_send.pop_front() {
                Some(id) => id,
                None => break,
            };

            match self.store.find_mut(id) {
                Some(stream) => stream.queued = false,
                None => continue,
            }

            out.extend(self.pump(id, max_frame));

            if self.conn_send_flow.available() == 0 {
                break;
            }
        }

        out
    }
}
