use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::hpack::table::{Table, STATIC_TABLE};
use crate::hpack::{huffman, Header};

/// Decodes headers using HPACK
#[derive(Debug)]
pub struct Decoder {
    // Protocol indicated that the max table size will update
    max_size_update: Option<usize>,
    table: Table,
}

/// Represents all errors that can be encountered while performing the decoding
/// of an HPACK header set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecoderError {
    InvalidRepresentation,
    InvalidIntegerPrefix,
    InvalidTableIndex,
    InvalidHuffmanCode,
    InvalidUtf8,
    InvalidStatusCode,
    InvalidPseudoheader,
    InvalidMaxDynamicSize,
    IntegerOverflow,
    NeedMore,
}

pub(super) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

// ===== impl Decoder =====

impl Decoder {
    /// Creates a new `Decoder` with all settings set to default values.
    pub fn new(size: usize) -> Decoder {
        Decoder {
            max_size_update: None,
            table: Table::new(size),
        }
    }

    /// Queues a potential size update.
    ///
    /// The peer may shrink its view of our table up to the most recently
    /// advertised HEADER_TABLE_SIZE setting; a dynamic table size update
    /// above that value is a decoding error.
    pub fn queue_size_update(&mut self, size: usize) {
        let size = match self.max_size_update {
            Some(v) => size.max(v),
            None => size,
        };
        self.max_size_update = Some(size);
    }

    /// Returns the current dynamic table size in octets.
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Decodes the headers found in the given buffer, invoking `f` for each
    /// decoded header field.
    ///
    /// The entire header block must be present in `src`; the buffer is fully
    /// consumed.
    pub fn decode<F>(&mut self, src: &mut BytesMut, mut f: F) -> Result<(), DecoderError>
    where
        F: FnMut(Header),
    {
        let buf = src.split();
        let mut cur = Cursor::new(&buf[..]);
        let mut can_resize = true;

        while let Some(first) = cur.peek() {
            tracing::trace!("decode; first byte = {:#b}", first);

            if first & 0b1000_0000 == 0b1000_0000 {
                // Indexed header field representation
                let index = cur.decode_int(7)?;
                let header = self.get_indexed(index)?;
                f(header);
                can_resize = false;
            } else if first & 0b1100_0000 == 0b0100_0000 {
                // Literal with incremental indexing
                let index = cur.decode_int(6)?;
                let name = self.decode_name(&mut cur, index)?;
                let value = cur.decode_string()?;

                self.table.insert(name.clone(), value.clone());

                f(Header::new(name, value)?);
                can_resize = false;
            } else if first & 0b1110_0000 == 0b0010_0000 {
                // Dynamic table size update; only permitted at the start of
                // a header block.
                if !can_resize {
                    return Err(DecoderError::InvalidMaxDynamicSize);
                }

                let size = cur.decode_int(5)?;
                let limit = self
                    .max_size_update
                    .take()
                    .unwrap_or_else(|| self.table.max_size());

                if size > limit {
                    tracing::debug!(
                        "dynamic table size update too large; size={} limit={}",
                        size,
                        limit
                    );
                    return Err(DecoderError::InvalidMaxDynamicSize);
                }

                self.table.set_max_size(size);
            } else {
                // Literal without indexing (0000) or never indexed (0001);
                // neither mutates the table.
                let index = cur.decode_int(4)?;
                let name = self.decode_name(&mut cur, index)?;
                let value = cur.decode_string()?;

                f(Header::new(name, value)?);
                can_resize = false;
            }
        }

        Ok(())
    }

    fn decode_name(&self, cur: &mut Cursor, index: usize) -> Result<Bytes, DecoderError> {
        if index == 0 {
            cur.decode_string()
        } else if index <= STATIC_TABLE.len() {
            Ok(Bytes::from_static(
                STATIC_TABLE[index - 1].0.as_bytes(),
            ))
        } else {
            match self.table.get(index - STATIC_TABLE.len() - 1) {
                Some((name, _)) => Ok(name.clone()),
                None => Err(DecoderError::InvalidTableIndex),
            }
        }
    }

    fn get_indexed(&self, index: usize) -> Result<Header, DecoderError> {
        if index == 0 {
            return Err(DecoderError::InvalidTableIndex);
        }

        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Header::new(
                Bytes::from_static(name.as_bytes()),
                Bytes::from_static(value.as_bytes()),
            );
        }

        match self.table.get(index - STATIC_TABLE.len() - 1) {
            Some((name, value)) => Header::new(name.clone(), value.clone()),
            None => Err(DecoderError::InvalidTableIndex),
        }
    }
}

impl Default for Decoder {
    fn default() -> Decoder {
        Decoder::new(4096)
    }
}

// ===== impl Cursor =====

impl<'a> Cursor<'a> {
    pub(super) fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<u8, DecoderError> {
        let b = self.peek().ok_or(DecoderError::NeedMore)?;
        self.pos += 1;
        Ok(b)
    }

    /// Decode an integer with an n-bit prefix, RFC 7541 § 5.1.
    pub(super) fn decode_int(&mut self, prefix_size: u8) -> Result<usize, DecoderError> {
        // The octet limit is chosen such that the maximum allowed *value*
        // can never overflow an unsigned 32-bit integer.
        const MAX_BYTES: usize = 5;

        debug_assert!((1..=8).contains(&prefix_size));

        let mask = ((1u16 << prefix_size) - 1) as u8;
        let mut ret = (self.next()? & mask) as usize;

        if ret < mask as usize {
            return Ok(ret);
        }

        let mut bytes = 1;
        let mut shift = 0;

        loop {
            let b = self.next()?;

            bytes += 1;
            ret += ((b & 0x7f) as usize) << shift;
            shift += 7;

            if b & 0x80 == 0 {
                return Ok(ret);
            }

            if bytes == MAX_BYTES {
                return Err(DecoderError::IntegerOverflow);
            }
        }
    }

    /// Decode a length-prefixed, possibly Huffman coded string.
    fn decode_string(&mut self) -> Result<Bytes, DecoderError> {
        const HUFF_FLAG: u8 = 0b1000_0000;

        let huff = match self.peek() {
            Some(b) => b & HUFF_FLAG == HUFF_FLAG,
            None => return Err(DecoderError::NeedMore),
        };

        let len = self.decode_int(7)?;

        if self.pos + len > self.buf.len() {
            tracing::trace!("decode_string underflow; len={}", len);
            return Err(DecoderError::NeedMore);
        }

        let raw = &self.buf[self.pos..self.pos + len];
        self.pos += len;

        if huff {
            let mut buf = BytesMut::with_capacity(len * 2);
            huffman::decode(raw, &mut buf)?;
            Ok(buf.freeze())
        } else {
            Ok(Bytes::copy_from_slice(raw))
        }
    }
}

impl fmt::Display for DecoderError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::DecoderError::*;

        let msg = match *self {
            InvalidRepresentation => "invalid representation",
            InvalidIntegerPrefix => "invalid integer prefix",
            InvalidTableIndex => "invalid table index",
            InvalidHuffmanCode => "invalid huffman code",
            InvalidUtf8 => "invalid utf-8",
            InvalidStatusCode => "invalid status code",
            InvalidPseudoheader => "invalid pseudo-header",
            InvalidMaxDynamicSize => "invalid max dynamic size",
            IntegerOverflow => "integer overflow",
            NeedMore => "ran out of input",
        };
        fmt.write_str(msg)
    }
}

impl std::error::Error for DecoderError {}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_all(decoder: &mut Decoder, src: &[u8]) -> Vec<Header> {
        let mut buf = BytesMut::from(src);
        let mut headers = vec![];
        decoder.decode(&mut buf, |h| headers.push(h)).unwrap();
        headers
    }

    #[test]
    fn indexed_static_method_get() {
        let mut decoder = Decoder::default();
        let headers = decode_all(&mut decoder, &[0x82]);
        assert_eq!(headers, vec![Header::Method(http::Method::GET)]);
    }

    #[test]
    fn literal_with_indexing_inserts() {
        // RFC 7541 Appendix C.2.1
        let mut decoder = Decoder::default();
        let src =
            hex::decode("400a637573746f6d2d6b65790d637573746f6d2d686561646572").unwrap();

        let headers = decode_all(&mut decoder, &src);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].name(), b"custom-key");
        assert_eq!(decoder.table_size(), 55);

        // The entry is now addressable at index 62.
        let headers = decode_all(&mut decoder, &[0x80 | 62]);
        assert_eq!(headers[0].name(), b"custom-key");
    }

    #[test]
    fn rfc_first_request_fixture() {
        // RFC 7541 Appendix C.3.1: GET http://www.example.com/
        let mut decoder = Decoder::default();
        let src = hex::decode("828684410f7777772e6578616d706c652e636f6d").unwrap();

        let headers = decode_all(&mut decoder, &src);
        assert_eq!(
            headers,
            vec![
                Header::Method(http::Method::GET),
                Header::Scheme("http".to_owned()),
                Header::Path("/".to_owned()),
                Header::Authority("www.example.com".to_owned()),
            ]
        );

        // The authority literal is the only dynamic insertion: 10 + 15 + 32.
        assert_eq!(decoder.table_size(), 57);
    }

    #[test]
    fn zero_index_is_an_error() {
        let mut decoder = Decoder::default();
        let mut buf = BytesMut::from(&[0x80][..]);
        let res = decoder.decode(&mut buf, |_| {});
        assert_eq!(res, Err(DecoderError::InvalidTableIndex));
    }

    #[test]
    fn size_update_after_field_rejected() {
        let mut decoder = Decoder::default();
        let mut buf = BytesMut::from(&[0x82, 0x3f, 0x01][..]);
        let res = decoder.decode(&mut buf, |_| {});
        assert_eq!(res, Err(DecoderError::InvalidMaxDynamicSize));
    }

    #[test]
    fn integer_decode() {
        // RFC 7541 Appendix C.1.1: 10 with a 5-bit prefix
        let mut cur = Cursor::new(&[0b01010]);
        assert_eq!(cur.decode_int(5).unwrap(), 10);

        // C.1.2: 1337 with a 5-bit prefix
        let mut cur = Cursor::new(&[0b11111, 0b10011010, 0b00001010]);
        assert_eq!(cur.decode_int(5).unwrap(), 1337);

        // C.1.3: 42 on an 8-bit prefix
        let mut cur = Cursor::new(&[0b00101010]);
        assert_eq!(cur.decode_int(8).unwrap(), 42);
    }
}
