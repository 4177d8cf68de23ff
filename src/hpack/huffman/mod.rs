mod table;

use bytes::{BufMut, BytesMut};
use once_cell::sync::Lazy;

use self::table::ENCODE_TABLE;
use crate::hpack::DecoderError;

/// The EOS symbol; it terminates the code space and must never appear in a
/// decoded stream.
const EOS: usize = 256;

/// Binary decode tree built from the fixed code table.
///
/// Walking one bit at a time is slower than a generated multi-bit state
/// machine but is derived mechanically from the encode table, so the two
/// directions cannot drift apart.
static DECODE_TREE: Lazy<Node> = Lazy::new(|| {
    let mut root = Node::default();

    for (sym, &(code, len)) in ENCODE_TABLE.iter().enumerate() {
        if sym == EOS {
            continue;
        }

        let mut node = &mut root;
        for i in (0..len).rev() {
            let bit = ((code >> i) & 1) as usize;
            node = node.children[bit].get_or_insert_with(|| Box::new(Node::default()));
        }
        node.symbol = Some(sym as u8);
    }

    root
});

#[derive(Debug, Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    symbol: Option<u8>,
}

/// Decode a Huffman encoded string.
pub fn decode(src: &[u8], buf: &mut BytesMut) -> Result<(), DecoderError> {
    let mut node: &Node = &DECODE_TREE;
    // Bits consumed since the last emitted symbol; used to validate the
    // trailing padding, which must be 7 or fewer 1 bits (an EOS prefix).
    let mut since_symbol = 0u8;
    let mut padding_ok = true;

    for &byte in src {
        for i in (0..8).rev() {
            let bit = ((byte >> i) & 1) as usize;

            node = match node.children[bit] {
                Some(ref child) => &**child,
                None => return Err(DecoderError::InvalidHuffmanCode),
            };

            since_symbol += 1;
            padding_ok = padding_ok && bit == 1;

            if let Some(sym) = node.symbol {
                buf.put_u8(sym);
                node = &DECODE_TREE;
                since_symbol = 0;
                padding_ok = true;
            }
        }
    }

    // A code terminating mid-tree is only legal as padding: at most 7 bits,
    // all set.
    if since_symbol > 7 || !padding_ok {
        return Err(DecoderError::InvalidHuffmanCode);
    }

    Ok(())
}

/// Returns the number of octets `src` occupies once Huffman encoded.
pub fn encoded_len(src: &[u8]) -> usize {
    let bits: usize = src
        .iter()
        .map(|&b| ENCODE_TABLE[b as usize].1 as usize)
        .sum();
    (bits + 7) / 8
}

/// Huffman encode a string.
pub fn encode(src: &[u8], dst: &mut BytesMut) {
    let mut bits: u64 = 0;
    let mut bits_left: u32 = 40;

    for &b in src {
        let (code, len) = ENCODE_TABLE[b as usize];

        // All codes fit in at most 30 bits, so 40 bits of head room always
        // suffices between flushes.
        bits |= (code as u64) << (bits_left - len as u32);
        bits_left -= len as u32;

        while bits_left <= 32 {
            dst.put_u8((bits >> 32) as u8);
            bits <<= 8;
            bits_left += 8;
        }
    }

    if bits_left != 40 {
        // Pad the remaining bits with 1s (an EOS prefix).
        bits |= (1 << bits_left) - 1;
        dst.put_u8((bits >> 32) as u8);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn huff_decode(src: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        decode(src, &mut buf).unwrap();
        buf
    }

    #[test]
    fn decode_single_byte() {
        assert_eq!("o", huff_decode(&[0b00111111]));
        assert_eq!("0", huff_decode(&[0x0 + 7]));
        assert_eq!("A", huff_decode(&[(0x21 << 2) + 3]));
    }

    #[test]
    fn single_char_multi_byte() {
        assert_eq!("#", huff_decode(&[255, 160 + 15]));
        assert_eq!("$", huff_decode(&[255, 200 + 7]));
        assert_eq!("\x0a", huff_decode(&[255, 255, 255, 240 + 3]));
    }

    #[test]
    fn multi_char() {
        assert_eq!("!0", huff_decode(&[254, 1]));
        assert_eq!(" !", huff_decode(&[0b01010011, 0b11111000]));
    }

    #[test]
    fn encode_single_byte() {
        let mut dst = BytesMut::with_capacity(1);

        encode(b"o", &mut dst);
        assert_eq!(&dst[..], &[0b00111111]);

        dst.clear();
        encode(b"0", &mut dst);
        assert_eq!(&dst[..], &[0x0 + 7]);

        dst.clear();
        encode(b"A", &mut dst);
        assert_eq!(&dst[..], &[(0x21 << 2) + 3]);
    }

    #[test]
    fn encode_decode_str() {
        const DATA: &[&str] = &[
            "hello world",
            ":method",
            ":scheme",
            ":authority",
            "yolo swag",
            "0123456789",
            "www.example.com",
            "custom-key",
            "custom-value",
            "!@#$%^&*()_+-=[]{};:'\",.<>?/",
        ];

        for s in DATA {
            let mut dst = BytesMut::with_capacity(s.len());
            encode(s.as_bytes(), &mut dst);

            let decoded = huff_decode(&dst);
            assert_eq!(&decoded[..], s.as_bytes());
        }
    }

    #[test]
    fn encode_decode_u8() {
        const DATA: &[&[u8]] = &[b"\0", b"\0\0\0", b"\0\x01\x02\x03\x04\x05", b"\xFF\xF8"];

        for s in DATA {
            let mut dst = BytesMut::with_capacity(s.len());
            encode(s, &mut dst);

            let decoded = huff_decode(&dst);
            assert_eq!(&decoded[..], &s[..]);
        }
    }

    #[test]
    fn rfc_fixtures() {
        // www.example.com, RFC 7541 Appendix C.4.1
        let encoded = hex::decode("f1e3c2e5f23a6ba0ab90f4ff").unwrap();
        assert_eq!("www.example.com", huff_decode(&encoded));

        let mut dst = BytesMut::new();
        encode(b"www.example.com", &mut dst);
        assert_eq!(hex::encode(&dst), "f1e3c2e5f23a6ba0ab90f4ff");

        // no-cache, RFC 7541 Appendix C.4.2
        let encoded = hex::decode("a8eb10649cbf").unwrap();
        assert_eq!("no-cache", huff_decode(&encoded));

        // custom-key / custom-value, RFC 7541 Appendix C.4.3
        let encoded = hex::decode("25a849e95ba97d7f").unwrap();
        assert_eq!("custom-key", huff_decode(&encoded));

        let encoded = hex::decode("25a849e95bb8e8b4bf").unwrap();
        assert_eq!("custom-value", huff_decode(&encoded));
    }

    #[test]
    fn rejects_eos_in_stream() {
        // The EOS code is 30 bits of 1s; 4 bytes of 0xff must fail.
        let mut buf = BytesMut::new();
        assert!(decode(&[0xff, 0xff, 0xff, 0xff], &mut buf).is_err());
    }
}
