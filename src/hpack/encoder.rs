use bytes::{BufMut, Bytes, BytesMut};

use crate::hpack::table::{self, Table};
use crate::hpack::{huffman, Header};

/// Encodes headers using HPACK
#[derive(Debug)]
pub struct Encoder {
    table: Table,
    size_update: Option<SizeUpdate>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SizeUpdate {
    One(usize),
    Two(usize, usize), // min, max
}

impl Encoder {
    pub fn new(max_size: usize) -> Encoder {
        Encoder {
            table: Table::new(max_size),
            size_update: None,
        }
    }

    /// Queues a max size update.
    ///
    /// The next call to `encode` will include a dynamic size update frame.
    pub fn update_max_size(&mut self, val: usize) {
        match self.size_update {
            Some(SizeUpdate::One(old)) => {
                if val > old {
                    if old > self.table.max_size() {
                        self.size_update = Some(SizeUpdate::One(val));
                    } else {
                        self.size_update = Some(SizeUpdate::Two(old, val));
                    }
                } else {
                    self.size_update = Some(SizeUpdate::One(val));
                }
            }
            Some(SizeUpdate::Two(min, _)) => {
                if val < min {
                    self.size_update = Some(SizeUpdate::One(val));
                } else {
                    self.size_update = Some(SizeUpdate::Two(min, val));
                }
            }
            None => {
                if val != self.table.max_size() {
                    // Don't bother writing a frame if the value already matches
                    // the table's max size.
                    self.size_update = Some(SizeUpdate::One(val));
                }
            }
        }
    }

    /// Returns the current dynamic table size in octets.
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Encode a header block into `dst`.
    pub fn encode<I>(&mut self, headers: I, dst: &mut BytesMut)
    where
        I: IntoIterator<Item = Header>,
    {
        if let Some(size_update) = self.size_update.take() {
            self.encode_size_updates(size_update, dst);
        }

        for header in headers {
            self.encode_header(&header, dst);
        }
    }

    fn encode_size_updates(&mut self, size_update: SizeUpdate, dst: &mut BytesMut) {
        match size_update {
            SizeUpdate::One(val) => {
                self.table.set_max_size(val);
                encode_size_update(val, dst);
            }
            SizeUpdate::Two(min, max) => {
                self.table.set_max_size(min);
                self.table.set_max_size(max);
                encode_size_update(min, dst);
                encode_size_update(max, dst);
            }
        }
    }

    fn encode_header(&mut self, header: &Header, dst: &mut BytesMut) {
        let name = header.name();
        let value = header.value();

        if header.is_sensitive() {
            // Literal, never indexed
            let index = table::static_name_index(name);
            encode_int(index.unwrap_or(0), 4, 0b0001_0000, dst);
            if index.is_none() {
                encode_str(name, dst);
            }
            encode_str(&value, dst);
            return;
        }

        // Fully indexed?
        if let Some(index) = table::static_full_index(name, &value) {
            encode_int(index, 7, 0b1000_0000, dst);
            return;
        }
        if let Some(offset) = self.table.find_full(name, &value) {
            encode_int(table::STATIC_TABLE.len() + 1 + offset, 7, 0b1000_0000, dst);
            return;
        }

        // Literal with incremental indexing, reusing an indexed name when
        // one exists.
        let index = table::static_name_index(name).or_else(|| {
            self.table
                .find_name(name)
                .map(|offset| table::STATIC_TABLE.len() + 1 + offset)
        });

        encode_int(index.unwrap_or(0), 6, 0b0100_0000, dst);

        let name = Bytes::copy_from_slice(name);
        if index.is_none() {
            encode_str(&name, dst);
        }
        encode_str(&value, dst);

        self.table.insert(name, value);
    }
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new(4096)
    }
}

fn encode_size_update(val: usize, dst: &mut BytesMut) {
    encode_int(val, 5, 0b0010_0000, dst)
}

/// Encode a string with a Huffman flag, choosing the shorter representation.
fn encode_str(val: &[u8], dst: &mut BytesMut) {
    let huff_len = huffman::encoded_len(val);

    if huff_len < val.len() {
        encode_int(huff_len, 7, 0b1000_0000, dst);
        huffman::encode(val, dst);
    } else {
        encode_int(val.len(), 7, 0, dst);
        dst.put_slice(val);
    }
}

/// Encode an integer into the given destination buffer
pub(super) fn encode_int(mut value: usize, prefix_bits: usize, first_byte: u8, dst: &mut BytesMut) {
    let mask = (1usize << prefix_bits) - 1;

    if value < mask {
        dst.put_u8(first_byte | value as u8);
        return;
    }

    dst.put_u8(first_byte | mask as u8);
    value -= mask;

    while value >= 128 {
        dst.put_u8(0b1000_0000 | (value as u8 & 0b0111_1111));
        value >>= 7;
    }

    dst.put_u8(value as u8);
}
