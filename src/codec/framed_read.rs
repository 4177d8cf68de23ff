use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::RecvError;
use crate::frame::{self, Frame, Head, Kind, Reason};
use crate::hpack;

// 16 MB "sane default" taken from golang http2
const DEFAULT_SETTINGS_MAX_HEADER_LIST_SIZE: usize = 16 << 20;

/// Decodes the raw byte stream into frames, reassembling header blocks and
/// running HPACK decompression at the frame boundary.
#[derive(Debug)]
pub struct FramedRead {
    // hpack decoder state
    hpack: hpack::Decoder,

    max_frame_size: u32,

    max_header_list_size: usize,

    partial: Option<Partial>,
}

/// Partially loaded headers frame
#[derive(Debug)]
struct Partial {
    /// Empty frame
    frame: frame::Headers,

    /// Partial header payload
    buf: BytesMut,
}

impl FramedRead {
    pub fn new() -> FramedRead {
        FramedRead {
            hpack: hpack::Decoder::new(frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE),
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_SETTINGS_MAX_HEADER_LIST_SIZE,
            partial: None,
        }
    }

    /// Returns the current max frame size setting
    #[inline]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size as usize
    }

    /// Updates the max frame size setting.
    ///
    /// Must be within 16,384 and 16,777,215.
    #[inline]
    pub fn set_max_frame_size(&mut self, val: usize) {
        assert!(frame::DEFAULT_MAX_FRAME_SIZE as usize <= val
            && val <= frame::MAX_MAX_FRAME_SIZE as usize);
        self.max_frame_size = val as u32;
    }

    /// Update the max header list size setting.
    #[inline]
    pub fn set_max_header_list_size(&mut self, val: usize) {
        self.max_header_list_size = val;
    }

    /// Queue an HPACK dynamic table size update, to be validated against the
    /// next size-update instruction the peer sends.
    pub fn queue_hpack_size_update(&mut self, val: usize) {
        self.hpack.queue_size_update(val);
    }

    /// Decode the next complete frame out of `src`.
    ///
    /// Returns `None` when more bytes are needed. Frames that carry no
    /// semantics here (unknown types, reassembly continuations) are consumed
    /// without being surfaced.
    pub fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, RecvError> {
        use self::RecvError::*;

        loop {
            if src.len() < frame::HEADER_LEN {
                return Ok(None);
            }

            // Peek at the frame length and validate before the full frame
            // has arrived.
            let len = ((src[0] as usize) << 16) | ((src[1] as usize) << 8) | src[2] as usize;

            if len > self.max_frame_size as usize {
                tracing::debug!(
                    "connection error FRAME_SIZE_ERROR -- frame size {} exceeds {}",
                    len,
                    self.max_frame_size
                );
                return Err(Connection(Reason::FRAME_SIZE_ERROR));
            }

            if src.len() < frame::HEADER_LEN + len {
                // Not enough data buffered to read the whole frame.
                return Ok(None);
            }

            let mut bytes = src.split_to(frame::HEADER_LEN + len);

            tracing::trace!("decoding frame from {}B", bytes.len());

            // Parse the head
            let head = Head::parse(&bytes);
            let kind = head.kind();

            tracing::trace!("    -> kind={:?}", kind);

            if self.partial.is_some() && kind != Kind::Continuation {
                tracing::debug!(
                    "connection error PROTOCOL_ERROR -- expected CONTINUATION, got {:?}",
                    kind
                );
                return Err(Connection(Reason::PROTOCOL_ERROR));
            }

            let frame = match kind {
                Kind::Settings => {
                    let res = frame::Settings::load(head, &bytes[frame::HEADER_LEN..]);

                    res.map_err(|e| {
                        tracing::debug!(
                            "connection error PROTOCOL_ERROR -- failed to load SETTINGS frame; err={:?}",
                            e
                        );
                        match e {
                            frame::Error::InvalidPayloadLength
                            | frame::Error::PartialSettingLength => {
                                Connection(Reason::FRAME_SIZE_ERROR)
                            }
                            _ => Connection(Reason::PROTOCOL_ERROR),
                        }
                    })?
                    .into()
                }
                Kind::Ping => {
                    let res = frame::Ping::load(head, &bytes[frame::HEADER_LEN..]);

                    res.map_err(|e| {
                        tracing::debug!(
                            "connection error PROTOCOL_ERROR -- failed to load PING frame; err={:?}",
                            e
                        );
                        match e {
                            frame::Error::BadFrameSize => Connection(Reason::FRAME_SIZE_ERROR),
                            _ => Connection(Reason::PROTOCOL_ERROR),
                        }
                    })?
                    .into()
                }
                Kind::WindowUpdate => {
                    let res = frame::WindowUpdate::load(head, &bytes[frame::HEADER_LEN..]);

                    res.map_err(|e| {
                        tracing::debug!(
                            "connection error PROTOCOL_ERROR -- failed to load WINDOW_UPDATE frame; err={:?}",
                            e
                        );
                        Connection(Reason::PROTOCOL_ERROR)
                    })?
                    .into()
                }
                Kind::Data => {
                    let _ = bytes.split_to(frame::HEADER_LEN);
                    let res = frame::Data::load(head, bytes.freeze());

                    res.map_err(|e| {
                        tracing::debug!(
                            "connection error PROTOCOL_ERROR -- failed to load DATA frame; err={:?}",
                            e
                        );
                        Connection(Reason::PROTOCOL_ERROR)
                    })?
                    .into()
                }
                Kind::Headers => {
                    let _ = bytes.split_to(frame::HEADER_LEN);

                    // Parse the header frame w/o parsing the payload
                    let (headers, payload) = match frame::Headers::load(head, bytes.freeze()) {
                        Ok(res) => res,
                        Err(frame::Error::InvalidDependencyId) => {
                            tracing::debug!(
                                "stream error PROTOCOL_ERROR -- invalid HEADERS dependency ID"
                            );
                            // A stream cannot depend on itself. An endpoint MUST
                            // treat this as a stream error (Section 5.4.2) of type
                            // `PROTOCOL_ERROR`.
                            return Err(Stream {
                                id: head.stream_id(),
                                reason: Reason::PROTOCOL_ERROR,
                            });
                        }
                        Err(e) => {
                            tracing::debug!(
                                "connection error PROTOCOL_ERROR -- failed to load HEADERS frame; err={:?}",
                                e
                            );
                            return Err(Connection(Reason::PROTOCOL_ERROR));
                        }
                    };

                    if !headers.is_end_headers() {
                        if payload.len() > self.max_header_list_size {
                            tracing::debug!(
                                "stream error REFUSED_STREAM -- header block too big; len={} limit={}",
                                payload.len(),
                                self.max_header_list_size
                            );
                            return Err(Stream {
                                id: head.stream_id(),
                                reason: Reason::REFUSED_STREAM,
                            });
                        }

                        // Defer loading the frame until the entire block has
                        // been received.
                        self.partial = Some(Partial {
                            frame: headers,
                            buf: payload,
                        });

                        continue;
                    }

                    self.load_hpack(headers, payload)?.into()
                }
                Kind::Reset => {
                    let res = frame::Reset::load(head, &bytes[frame::HEADER_LEN..]);
                    res.map_err(|e| {
                        tracing::debug!(
                            "connection error PROTOCOL_ERROR -- failed to load RESET frame; err={:?}",
                            e
                        );
                        Connection(Reason::PROTOCOL_ERROR)
                    })?
                    .into()
                }
                Kind::GoAway => {
                    let res = frame::GoAway::load(&bytes[frame::HEADER_LEN..]);
                    res.map_err(|e| {
                        tracing::debug!(
                            "connection error PROTOCOL_ERROR -- failed to load GO_AWAY frame; err={:?}",
                            e
                        );
                        Connection(Reason::PROTOCOL_ERROR)
                    })?
                    .into()
                }
                Kind::PushPromise => {
                    // A server never enables push, so a PUSH_PROMISE from the
                    // peer is a protocol violation.
                    tracing::debug!("connection error PROTOCOL_ERROR -- received PUSH_PROMISE");
                    return Err(Connection(Reason::PROTOCOL_ERROR));
                }
                Kind::Priority => {
                    if head.stream_id().is_zero() {
                        // Invalid stream identifier
                        return Err(Connection(Reason::PROTOCOL_ERROR));
                    }

                    match frame::Priority::load(head, &bytes[frame::HEADER_LEN..]) {
                        Ok(frame) => frame.into(),
                        Err(frame::Error::InvalidDependencyId) => {
                            // A stream cannot depend on itself. An endpoint MUST
                            // treat this as a stream error (Section 5.4.2) of type
                            // `PROTOCOL_ERROR`.
                            tracing::debug!(
                                "stream error PROTOCOL_ERROR -- PRIORITY invalid dependency ID"
                            );
                            return Err(Stream {
                                id: head.stream_id(),
                                reason: Reason::PROTOCOL_ERROR,
                            });
                        }
                        Err(_) => return Err(Connection(Reason::PROTOCOL_ERROR)),
                    }
                }
                Kind::Continuation => {
                    let end_of_headers = head.flag() & 0x4 == 0x4;

                    let mut partial = match self.partial.take() {
                        Some(partial) => partial,
                        None => {
                            tracing::debug!(
                                "connection error PROTOCOL_ERROR -- received unexpected CONTINUATION frame"
                            );
                            return Err(Connection(Reason::PROTOCOL_ERROR));
                        }
                    };

                    // The stream identifiers must match
                    if partial.frame.stream_id() != head.stream_id() {
                        tracing::debug!(
                            "connection error PROTOCOL_ERROR -- CONTINUATION frame stream ID does not match previous frame stream ID"
                        );
                        return Err(Connection(Reason::PROTOCOL_ERROR));
                    }

                    // Extend the buf
                    partial.buf.extend_from_slice(&bytes[frame::HEADER_LEN..]);

                    if partial.buf.len() > self.max_header_list_size {
                        tracing::debug!(
                            "stream error REFUSED_STREAM -- header block too big; len={} limit={}",
                            partial.buf.len(),
                            self.max_header_list_size
                        );
                        return Err(Stream {
                            id: head.stream_id(),
                            reason: Reason::REFUSED_STREAM,
                        });
                    }

                    if !end_of_headers {
                        self.partial = Some(partial);
                        continue;
                    }

                    let mut frame = partial.frame;
                    frame.set_end_headers();
                    self.load_hpack(frame, partial.buf)?.into()
                }
                Kind::Unknown => {
                    // Unknown frames are ignored
                    continue;
                }
            };

            return Ok(Some(frame));
        }
    }

    fn load_hpack(
        &mut self,
        mut frame: frame::Headers,
        mut payload: BytesMut,
    ) -> Result<frame::Headers, RecvError> {
        let stream_id = frame.stream_id();

        match frame.load_hpack(&mut payload, self.max_header_list_size, &mut self.hpack) {
            Ok(_) => {}
            Err(frame::Error::MalformedMessage) => {
                tracing::debug!("stream error PROTOCOL_ERROR -- malformed header block");
                return Err(RecvError::Stream {
                    id: stream_id,
                    reason: Reason::PROTOCOL_ERROR,
                });
            }
            Err(e) => {
                tracing::debug!(
                    "connection error COMPRESSION_ERROR -- failed HPACK decoding; err={:?}",
                    e
                );
                return Err(RecvError::Connection(Reason::COMPRESSION_ERROR));
            }
        }

        Ok(frame)
    }
}

impl Default for FramedRead {
    fn default() -> Self {
        FramedRead::new()
    }
}

impl Decoder for FramedRead {
    type Item = Frame;
    type Error = RecvError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, RecvError> {
        let frame = self.decode_frame(src)?;
        if let Some(ref frame) = frame {
            tracing::debug!("received; frame={:?}", frame);
        }
        Ok(frame)
    }
}
