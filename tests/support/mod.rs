//! Shared helpers for driving a server connection with hand-written client
//! frames and picking apart what it emits.
#![allow(dead_code)]

use trellis::{Config, Connection};

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const DATA: u8 = 0;
pub const HEADERS: u8 = 1;
pub const PRIORITY: u8 = 2;
pub const RST_STREAM: u8 = 3;
pub const SETTINGS: u8 = 4;
pub const PING: u8 = 6;
pub const GOAWAY: u8 = 7;
pub const WINDOW_UPDATE: u8 = 8;
pub const CONTINUATION: u8 = 9;

pub const END_STREAM: u8 = 0x1;
pub const ACK: u8 = 0x1;
pub const END_HEADERS: u8 = 0x4;

/// A decoded frame header plus raw payload.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

/// Build one frame: 9 byte head plus payload.
pub fn frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(9 + len);
    out.push((len >> 16) as u8);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.push(kind);
    out.push(flags);
    out.extend_from_slice(&stream_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn settings_frame(pairs: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(pairs.len() * 6);
    for &(id, value) in pairs {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    frame(SETTINGS, 0, 0, &payload)
}

pub fn settings_ack() -> Vec<u8> {
    frame(SETTINGS, ACK, 0, &[])
}

pub fn window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    frame(WINDOW_UPDATE, 0, stream_id, &increment.to_be_bytes())
}

pub fn rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
    frame(RST_STREAM, 0, stream_id, &error_code.to_be_bytes())
}

pub fn go_away(last_stream_id: u32, error_code: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&last_stream_id.to_be_bytes());
    payload.extend_from_slice(&error_code.to_be_bytes());
    frame(GOAWAY, 0, 0, &payload)
}

/// HPACK header block for a GET request: `:method GET` and `:path` from the
/// static table or as a plain literal.
pub fn request_block(method_index: u8, path: &str) -> Vec<u8> {
    let mut block = vec![0x80 | method_index];
    match path {
        "/" => block.push(0x84),
        path => {
            // Literal with incremental indexing, name = static index 4
            // (:path), value as a plain string.
            block.push(0x44);
            block.push(path.len() as u8);
            block.extend_from_slice(path.as_bytes());
        }
    }
    block
}

/// A complete GET request HEADERS frame.
pub fn get_request(stream_id: u32, path: &str) -> Vec<u8> {
    let block = request_block(2, path);
    frame(HEADERS, END_HEADERS | END_STREAM, stream_id, &block)
}

/// A HEADERS frame opening a stream without ending it (a body follows).
pub fn open_request(stream_id: u32, path: &str) -> Vec<u8> {
    // :method POST is static index 3.
    let block = request_block(3, path);
    frame(HEADERS, END_HEADERS, stream_id, &block)
}

pub fn data(stream_id: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
    frame(DATA, flags, stream_id, payload)
}

/// Split a raw byte stream back into frames.
pub fn parse_frames(mut src: &[u8]) -> Vec<RawFrame> {
    let mut frames = Vec::new();

    while src.len() >= 9 {
        let len = ((src[0] as usize) << 16) | ((src[1] as usize) << 8) | src[2] as usize;
        assert!(src.len() >= 9 + len, "truncated frame in output");

        frames.push(RawFrame {
            kind: src[3],
            flags: src[4],
            stream_id: u32::from_be_bytes([src[5], src[6], src[7], src[8]]) & 0x7fff_ffff,
            payload: src[9..9 + len].to_vec(),
        });

        src = &src[9 + len..];
    }

    assert!(src.is_empty(), "trailing garbage in output");
    frames
}

/// Create a server connection and complete the preface and settings
/// exchange, asserting the server leads with SETTINGS.
pub fn handshake(config: Config) -> Connection {
    let mut conn = Connection::server(config);

    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&settings_frame(&[]));
    conn.on_bytes(&bytes).unwrap();

    let frames = parse_frames(&conn.take_output());
    assert_eq!(frames[0].kind, SETTINGS, "server must lead with SETTINGS");
    assert_eq!(frames[0].flags & ACK, 0);
    assert!(
        frames.iter().any(|f| f.kind == SETTINGS && f.flags & ACK != 0),
        "server must ACK the client settings"
    );

    // ACK the server's settings.
    conn.on_bytes(&settings_ack()).unwrap();
    let _ = conn.take_output();

    conn
}
