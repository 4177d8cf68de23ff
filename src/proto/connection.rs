use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Request, Response};

use crate::codec::{FramedRead, FramedWrite, RecvError, UserError};
use crate::frame::{self, Frame, Pseudo, Reason, StreamId};
use crate::proto::{GoAway, Settings, Streams};
use crate::Error;

/// The 24 byte client connection preface.
const PREFACE: [u8; 24] = *b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Engine configuration; the values map onto the SETTINGS we advertise plus
/// local buffering limits.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-stream receive window we advertise (INITIAL_WINDOW_SIZE).
    pub initial_window_size: u32,

    /// The level the connection receive window is kept at.
    pub initial_connection_window_size: u32,

    /// Largest frame payload we accept (MAX_FRAME_SIZE).
    pub max_frame_size: u32,

    /// Cap on concurrently active peer streams (MAX_CONCURRENT_STREAMS).
    pub max_concurrent_streams: Option<u32>,

    /// Advisory cap on decoded header blocks (MAX_HEADER_LIST_SIZE).
    pub max_header_list_size: usize,

    /// Our HPACK dynamic table budget (HEADER_TABLE_SIZE).
    pub header_table_size: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            initial_connection_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: Some(256),
            max_header_list_size: 16 << 20,
            header_table_size: frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE as u32,
        }
    }
}

/// Events surfaced to the embedder as the engine digests transport bytes.
#[derive(Debug)]
pub enum Event {
    /// A request header block completed on a stream.
    Request {
        stream_id: StreamId,
        request: Request<()>,
        end_of_stream: bool,
    },

    /// A chunk of request body arrived.
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_of_stream: bool,
    },

    /// A trailer block closed the request body.
    Trailers {
        stream_id: StreamId,
        fields: HeaderMap,
    },

    /// The stream was aborted.
    Reset { stream_id: StreamId, reason: Reason },

    /// The peer is shutting the connection down.
    GoAway {
        last_stream_id: StreamId,
        reason: Reason,
        debug_data: Bytes,
    },
}

/// One unit of a response, in the order a handler produces them.
#[derive(Debug)]
pub enum ResponseUnit {
    /// The response status and headers.
    Headers(Response<()>),

    /// A chunk of response body.
    Data(Bytes),

    /// End of the response.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Server side: awaiting the 24 byte magic.
    ReadPreface { pos: usize },

    /// Frames are flowing.
    Open,

    /// A fatal error occurred or GOAWAY completed; no further processing.
    Closed,
}

/// A byte-driven HTTP/2 server connection.
///
/// Feed transport bytes in with [`on_bytes`], drain engine output with
/// [`take_output`], pull request events with [`poll_event`] and hand
/// responses back with [`write_response`]. All stream state for the
/// connection is owned here and must be driven from a single task.
///
/// [`on_bytes`]: Connection::on_bytes
/// [`take_output`]: Connection::take_output
/// [`poll_event`]: Connection::poll_event
/// [`write_response`]: Connection::write_response
#[derive(Debug)]
pub struct Connection {
    state: ConnState,
    framed_read: FramedRead,
    framed_write: FramedWrite,
    in_buf: BytesMut,
    out_buf: BytesMut,
    settings: Settings,
    go_away: GoAway,
    streams: Streams,
    events: VecDeque<Event>,
    config: Config,
    error: Option<Reason>,

    /// The first frame after the preface must be SETTINGS.
    remote_settled: bool,
}

impl Connection {
    /// Create a server-side connection: the preface is expected before any
    /// frame, and our SETTINGS go out as soon as it has been read.
    pub fn server(config: Config) -> Connection {
        let mut framed_read = FramedRead::new();
        framed_read.set_max_frame_size(config.max_frame_size as usize);
        framed_read.set_max_header_list_size(config.max_header_list_size);

        let mut local = frame::Settings::default();
        local.set_initial_window_size(Some(config.initial_window_size));
        local.set_max_frame_size(Some(config.max_frame_size));
        local.set_max_concurrent_streams(config.max_concurrent_streams);
        local.set_header_table_size(Some(config.header_table_size));

        Connection {
            state: ConnState::ReadPreface { pos: 0 },
            framed_read,
            framed_write: FramedWrite::new(),
            in_buf: BytesMut::with_capacity(4096),
            out_buf: BytesMut::with_capacity(4096),
            settings: Settings::new(local),
            go_away: GoAway::new(),
            streams: Streams::new(&config),
            events: VecDeque::new(),
            config,
            error: None,
            remote_settled: false,
        }
    }

    /// Feed transport bytes into the engine.
    ///
    /// Frames are processed strictly in arrival order. Connection errors are
    /// handled internally: a GOAWAY is queued in the output buffer and the
    /// connection moves to the closed state.
    pub fn on_bytes(&mut self, src: &[u8]) -> Result<(), Error> {
        if self.state == ConnState::Closed {
            return Ok(());
        }

        self.in_buf.extend_from_slice(src);

        if let ConnState::ReadPreface { pos } = self.state {
            let want = PREFACE.len() - pos;
            let have = self.in_buf.len().min(want);

            if self.in_buf[..have] != PREFACE[pos..pos + have] {
                tracing::debug!("connection error PROTOCOL_ERROR -- invalid connection preface");
                self.handle_connection_error(Reason::PROTOCOL_ERROR);
                return Err(Error::Protocol(Reason::PROTOCOL_ERROR));
            }

            let _ = self.in_buf.split_to(have);

            if have < want {
                self.state = ConnState::ReadPreface { pos: pos + have };
                return Ok(());
            }

            self.state = ConnState::Open;

            // The server must not send any frame before the preface has been
            // received; now that it has, lead with SETTINGS.
            let local = self.settings.send_local();
            self.buffer(local.into());
        }

        loop {
            let frame = match self.framed_read.decode_frame(&mut self.in_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.handle_recv_error(e);
                    return Ok(());
                }
            };

            if let Err(e) = self.recv_frame(frame) {
                self.handle_recv_error(e);
                if self.state == ConnState::Closed {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// The transport hit EOF or an error; abort everything.
    pub fn recv_eof(&mut self) {
        for event in self.streams.handle_error(Reason::CANCEL) {
            self.events.push_back(event);
        }
        self.state = ConnState::Closed;
    }

    /// Pop the next pending event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Write response units for a stream, respecting flow control.
    ///
    /// Data that exceeds the current stream or connection window is parked
    /// and flushed as WINDOW_UPDATE frames arrive.
    pub fn write_response<I>(&mut self, stream_id: StreamId, units: I) -> Result<(), UserError>
    where
        I: IntoIterator<Item = ResponseUnit>,
    {
        if self.error.is_some() {
            return Err(UserError::SendAfterClose);
        }

        for unit in units {
            match unit {
                ResponseUnit::Headers(response) => {
                    self.streams.send_headers(stream_id, false)?;

                    let (parts, _) = response.into_parts();
                    let pseudo = Pseudo::response(parts.status);
                    let frame = frame::Headers::new(stream_id, pseudo, parts.headers);
                    self.buffer(frame.into());
                }
                ResponseUnit::Data(data) => {
                    let max_frame = self.framed_write.max_frame_size();
                    let frames = self.streams.send_data(stream_id, data, max_frame)?;
                    self.buffer_all(frames);
                }
                ResponseUnit::End => {
                    let max_frame = self.framed_write.max_frame_size();
                    let frames = self.streams.send_eos(stream_id, max_frame)?;
                    self.buffer_all(frames);
                }
            }
        }

        Ok(())
    }

    /// Abort a single stream with RST_STREAM.
    pub fn reset_stream(&mut self, stream_id: StreamId, reason: Reason) {
        self.streams.send_reset(stream_id, reason);
        self.buffer(frame::Reset::new(stream_id, reason).into());
    }

    /// Initiate connection shutdown with a GOAWAY frame.
    ///
    /// Streams at or below the last peer stream id may still complete; the
    /// connection closes once they have.
    pub fn close(&mut self, reason: Reason) {
        self.go_away(self.streams.last_peer_stream_id(), reason, Bytes::new());
    }

    /// Drain whatever the engine wants to put on the wire.
    pub fn take_output(&mut self) -> Bytes {
        self.out_buf.split().freeze()
    }

    pub fn has_output(&self) -> bool {
        !self.out_buf.is_empty()
    }

    /// True when no further processing will happen: a fatal error occurred,
    /// or a GOAWAY was exchanged and all streams have finished.
    pub fn is_closed(&self) -> bool {
        match self.state {
            ConnState::Closed => true,
            _ => self.go_away.is_going_away() && self.streams.all_closed(),
        }
    }

    pub fn error(&self) -> Option<Reason> {
        self.error
    }

    // ===== frame dispatch =====

    fn recv_frame(&mut self, frame: Frame) -> Result<(), RecvError> {
        // The first frame the peer sends after the preface must be SETTINGS.
        if !self.remote_settled {
            match frame {
                Frame::Settings(ref settings) if !settings.is_ack() => {}
                _ => {
                    tracing::debug!(
                        "connection error PROTOCOL_ERROR -- expected SETTINGS, got {:?}",
                        frame
                    );
                    return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
                }
            }
        }

        match frame {
            Frame::Settings(settings) => self.recv_settings(settings)?,
            Frame::Ping(ping) => {
                // An endpoint MUST NOT respond to PING frames carrying ACK.
                if !ping.is_ack() {
                    let pong = frame::Ping::pong(ping.into_payload());
                    self.buffer(pong.into());
                }
            }
            Frame::Headers(headers) => {
                let accepting = self.go_away.accepting_stream(headers.stream_id());
                if let Some(event) = self.streams.recv_headers(headers, accepting)? {
                    self.events.push_back(event);
                }
            }
            Frame::Data(data) => {
                let (event, frames) = self.streams.recv_data(data)?;
                self.buffer_all(frames);
                if let Some(event) = event {
                    self.events.push_back(event);
                }
            }
            Frame::WindowUpdate(update) => {
                let max_frame = self.framed_write.max_frame_size();
                let frames = self.streams.recv_window_update(update, max_frame)?;
                self.buffer_all(frames);
            }
            Frame::Reset(reset) => {
                if let Some(event) = self.streams.recv_reset(reset) {
                    self.events.push_back(event);
                }
            }
            Frame::GoAway(go_away) => {
                let last = go_away.last_stream_id();
                let reason = go_away.reason();

                self.go_away.record_received(last, reason);

                for event in self.streams.recv_go_away(last) {
                    self.events.push_back(event);
                }

                self.events.push_back(Event::GoAway {
                    last_stream_id: last,
                    reason,
                    debug_data: go_away.debug_data().clone(),
                });
            }
            Frame::Priority(priority) => {
                // Parsed and validated, otherwise unused.
                tracing::trace!("ignoring PRIORITY; frame={:?}", priority);
            }
        }

        Ok(())
    }

    fn recv_settings(&mut self, settings: frame::Settings) -> Result<(), RecvError> {
        if settings.is_ack() {
            let local = self.settings.recv_ack()?;

            // Our settings are now in force for the peer; size the hpack
            // decoder accordingly.
            if let Some(size) = local.header_table_size() {
                self.framed_read.queue_hpack_size_update(size as usize);
            }

            return Ok(());
        }

        self.remote_settled = true;

        // The peer's settings take effect immediately.
        if let Some(max) = settings.max_frame_size() {
            self.framed_write.set_max_frame_size(max as usize);
        }
        if let Some(size) = settings.header_table_size() {
            let cap = (self.config.header_table_size as usize).min(size as usize);
            self.framed_write.set_header_table_size(cap);
        }
        self.streams.apply_remote_settings(&settings);
        self.settings.recv_settings(settings);

        // ACK receipt, then flush anything a window change freed up.
        self.buffer(frame::Settings::ack().into());
        let max_frame = self.framed_write.max_frame_size();
        let frames = self.streams.drain_pending(max_frame);
        self.buffer_all(frames);

        Ok(())
    }

    fn handle_recv_error(&mut self, err: RecvError) {
        match err {
            RecvError::Connection(reason) => {
                self.handle_connection_error(reason);
            }
            RecvError::Stream { id, reason } => {
                tracing::debug!("stream error; id={:?} reason={:?}", id, reason);
                self.streams.send_reset(id, reason);
                self.buffer(frame::Reset::new(id, reason).into());
                self.events.push_back(Event::Reset {
                    stream_id: id,
                    reason,
                });
            }
            RecvError::Io(e) => {
                tracing::debug!("io error; err={:?}", e);
                self.handle_connection_error(Reason::INTERNAL_ERROR);
            }
        }
    }

    fn handle_connection_error(&mut self, reason: Reason) {
        self.go_away(self.streams.last_peer_stream_id(), reason, Bytes::new());

        for event in self.streams.handle_error(reason) {
            self.events.push_back(event);
        }

        self.error = Some(reason);
        self.state = ConnState::Closed;
    }

    fn go_away(&mut self, last_stream_id: StreamId, reason: Reason, debug_data: Bytes) {
        if !self.go_away.record_sent(last_stream_id, reason) {
            return;
        }

        tracing::debug!(
            "send GOAWAY; last_stream_id={:?} reason={:?}",
            last_stream_id,
            reason
        );
        let frame = frame::GoAway::with_debug_data(last_stream_id, reason, debug_data);
        self.buffer(frame.into());
    }

    fn buffer(&mut self, frame: Frame) {
        self.framed_write.buffer(frame, &mut self.out_buf);
    }

    fn buffer_all(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            self.buffer(frame);
        }
    }
}
