use std::io;

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::frame::{self, Frame};
use crate::hpack;

/// Encodes frames into the raw byte stream, running HPACK compression over
/// header blocks and splitting them into CONTINUATION frames as needed.
#[derive(Debug)]
pub struct FramedWrite {
    // hpack encoder state
    hpack: hpack::Encoder,

    /// Max frame size, this is specified by the peer
    max_frame_size: u32,
}

impl FramedWrite {
    pub fn new() -> FramedWrite {
        FramedWrite {
            hpack: hpack::Encoder::new(frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE),
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Returns the max frame size that can be sent
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size as usize
    }

    /// Set the peer's max frame size.
    pub fn set_max_frame_size(&mut self, val: usize) {
        assert!(val <= frame::MAX_MAX_FRAME_SIZE as usize);
        self.max_frame_size = val as u32;
    }

    /// Set the peer's header table size, capping the hpack dynamic table.
    pub fn set_header_table_size(&mut self, val: usize) {
        self.hpack.update_max_size(val);
    }

    /// Encode `frame` into `dst`.
    pub fn buffer(&mut self, frame: Frame, dst: &mut BytesMut) {
        tracing::debug!("send; frame={:?}", frame);

        match frame {
            Frame::Data(v) => v.encode(dst),
            Frame::Headers(v) => v.encode(&mut self.hpack, dst, self.max_frame_size as usize),
            Frame::Settings(v) => v.encode(dst),
            Frame::Ping(v) => v.encode(dst),
            Frame::GoAway(v) => v.encode(dst),
            Frame::WindowUpdate(v) => v.encode(dst),
            Frame::Reset(v) => v.encode(dst),
            Frame::Priority(_) => {
                // This library does not initiate prioritization.
                unreachable!("PRIORITY frames are never sent");
            }
        }
    }
}

impl Default for FramedWrite {
    fn default() -> Self {
        FramedWrite::new()
    }
}

impl Encoder<Frame> for FramedWrite {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        self.buffer(frame, dst);
        Ok(())
    }
}
