mod support;

use std::sync::Arc;

use support::*;
use trellis::route::{Host, Route};
use trellis::{Config, Connection, Event, ResponseUnit, StreamId};

fn response(status: u16) -> http::Response<()> {
    http::Response::builder().status(status).body(()).unwrap()
}

#[test]
fn server_leads_with_settings_and_acks() {
    // The handshake helper asserts the ordering invariants.
    let conn = handshake(Config::default());
    assert!(!conn.is_closed());
}

#[test]
fn server_sends_nothing_before_the_preface() {
    let mut conn = Connection::server(Config::default());

    // Half a preface: no output may be produced yet.
    conn.on_bytes(&PREFACE[..10]).unwrap();
    assert!(conn.take_output().is_empty());

    conn.on_bytes(&PREFACE[10..]).unwrap();
    let frames = parse_frames(&conn.take_output());
    assert_eq!(frames[0].kind, SETTINGS);
}

#[test]
fn bad_preface_tears_down() {
    let mut conn = Connection::server(Config::default());
    assert!(conn.on_bytes(b"GET / HTTP/1.1\r\n\r\n").is_err());
    assert!(conn.is_closed());
}

#[test]
fn first_frame_must_be_settings() {
    let mut conn = Connection::server(Config::default());

    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&frame(PING, 0, 0, &[0; 8]));
    conn.on_bytes(&bytes).unwrap();

    let frames = parse_frames(&conn.take_output());
    let goaway = frames.iter().find(|f| f.kind == GOAWAY).expect("GOAWAY");
    // last_stream_id(4) | error_code(4): PROTOCOL_ERROR
    assert_eq!(&goaway.payload[4..8], &1u32.to_be_bytes());
    assert!(conn.is_closed());
}

#[test]
fn ping_is_answered_with_ack() {
    let mut conn = handshake(Config::default());

    let payload = [1, 2, 3, 4, 5, 6, 7, 8];
    conn.on_bytes(&frame(PING, 0, 0, &payload)).unwrap();

    let frames = parse_frames(&conn.take_output());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, PING);
    assert_eq!(frames[0].flags & ACK, ACK);
    assert_eq!(frames[0].payload, payload);

    // An endpoint must not respond to PING frames carrying ACK.
    conn.on_bytes(&frame(PING, ACK, 0, &payload)).unwrap();
    assert!(conn.take_output().is_empty());
}

#[test]
fn request_round_trip() {
    let mut conn = handshake(Config::default());

    conn.on_bytes(&get_request(1, "/")).unwrap();

    let (stream_id, end_of_stream) = match conn.poll_event() {
        Some(Event::Request {
            stream_id,
            request,
            end_of_stream,
        }) => {
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(request.uri().path(), "/");
            (stream_id, end_of_stream)
        }
        other => panic!("expected request event, got {:?}", other),
    };
    assert_eq!(stream_id, StreamId::from(1));
    assert!(end_of_stream);

    conn.write_response(
        stream_id,
        vec![
            ResponseUnit::Headers(response(200)),
            ResponseUnit::Data(bytes::Bytes::from_static(b"hello")),
            ResponseUnit::End,
        ],
    )
    .unwrap();

    let frames = parse_frames(&conn.take_output());
    assert_eq!(frames[0].kind, HEADERS);
    // ":status 200" is static table index 8.
    assert_eq!(frames[0].payload, vec![0x88]);
    assert_eq!(frames[1].kind, DATA);
    assert_eq!(frames[1].payload, b"hello");
    // End of stream travels as an empty DATA frame.
    assert_eq!(frames[2].kind, DATA);
    assert!(frames[2].payload.is_empty());
    assert_eq!(frames[2].flags & END_STREAM, END_STREAM);
}

#[test]
fn peer_stream_ids_must_increase() {
    let mut conn = handshake(Config::default());

    conn.on_bytes(&get_request(3, "/")).unwrap();
    assert!(matches!(conn.poll_event(), Some(Event::Request { .. })));

    conn.on_bytes(&get_request(1, "/")).unwrap();

    let frames = parse_frames(&conn.take_output());
    assert!(frames.iter().any(|f| f.kind == GOAWAY));
    assert!(conn.is_closed());
}

#[test]
fn even_stream_ids_from_client_are_rejected() {
    let mut conn = handshake(Config::default());

    conn.on_bytes(&get_request(2, "/")).unwrap();
    let frames = parse_frames(&conn.take_output());
    assert!(frames.iter().any(|f| f.kind == GOAWAY));
}

#[test]
fn continuation_interleave_is_a_protocol_error() {
    let mut conn = handshake(Config::default());

    // HEADERS without END_HEADERS: a CONTINUATION must follow immediately.
    let block = request_block(2, "/");
    conn.on_bytes(&frame(HEADERS, 0, 1, &block)).unwrap();
    conn.on_bytes(&frame(PING, 0, 0, &[0; 8])).unwrap();

    let frames = parse_frames(&conn.take_output());
    let goaway = frames.iter().find(|f| f.kind == GOAWAY).expect("GOAWAY");
    assert_eq!(&goaway.payload[4..8], &1u32.to_be_bytes());
}

#[test]
fn continuation_completes_a_header_block() {
    let mut conn = handshake(Config::default());

    let block = request_block(2, "/split");
    let (first, second) = block.split_at(1);

    conn.on_bytes(&frame(HEADERS, END_STREAM, 1, first)).unwrap();
    assert!(conn.poll_event().is_none());

    conn.on_bytes(&frame(CONTINUATION, END_HEADERS, 1, second))
        .unwrap();

    match conn.poll_event() {
        Some(Event::Request { request, .. }) => {
            assert_eq!(request.uri().path(), "/split");
        }
        other => panic!("expected request event, got {:?}", other),
    }
}

#[test]
fn continuation_for_wrong_stream_is_a_protocol_error() {
    let mut conn = handshake(Config::default());

    let block = request_block(2, "/");
    conn.on_bytes(&frame(HEADERS, 0, 1, &block)).unwrap();
    conn.on_bytes(&frame(CONTINUATION, END_HEADERS, 3, &[]))
        .unwrap();

    let frames = parse_frames(&conn.take_output());
    assert!(frames.iter().any(|f| f.kind == GOAWAY));
}

#[test]
fn window_update_of_zero_resets_the_stream() {
    let mut conn = handshake(Config::default());

    conn.on_bytes(&open_request(1, "/upload")).unwrap();
    conn.on_bytes(&window_update(1, 0)).unwrap();

    let frames = parse_frames(&conn.take_output());
    let reset = frames.iter().find(|f| f.kind == RST_STREAM).expect("RST");
    assert_eq!(reset.stream_id, 1);
    assert_eq!(&reset.payload[..], &1u32.to_be_bytes());

    // The connection itself survives; a zero increment on stream 0 is
    // ignored outright.
    conn.on_bytes(&window_update(0, 0)).unwrap();
    assert!(conn.take_output().is_empty());
    assert!(!conn.is_closed());
}

#[test]
fn unsolicited_settings_ack_is_a_protocol_error() {
    let mut conn = handshake(Config::default());

    // The handshake already consumed the one expected ACK.
    conn.on_bytes(&settings_ack()).unwrap();
    let frames = parse_frames(&conn.take_output());
    assert!(frames.iter().any(|f| f.kind == GOAWAY));
}

#[test]
fn goaway_aborts_high_streams_and_refuses_new_ones() {
    let mut conn = handshake(Config::default());

    // Streams 1 and 3 are open.
    conn.on_bytes(&open_request(1, "/one")).unwrap();
    conn.on_bytes(&open_request(3, "/three")).unwrap();
    assert!(matches!(conn.poll_event(), Some(Event::Request { .. })));
    assert!(matches!(conn.poll_event(), Some(Event::Request { .. })));

    // Peer goes away, promising to handle only stream 1.
    conn.on_bytes(&go_away(1, 0)).unwrap();

    match conn.poll_event() {
        Some(Event::Reset { stream_id, .. }) => assert_eq!(stream_id, StreamId::from(3)),
        other => panic!("expected stream 3 reset, got {:?}", other),
    }
    assert!(matches!(conn.poll_event(), Some(Event::GoAway { .. })));

    // A new stream is silently discarded.
    conn.on_bytes(&get_request(5, "/five")).unwrap();
    assert!(conn.poll_event().is_none());
    assert!(!conn.is_closed());

    // Stream 1 completes normally.
    conn.on_bytes(&data(1, END_STREAM, b"done")).unwrap();
    assert!(matches!(conn.poll_event(), Some(Event::Data { .. })));

    conn.write_response(
        StreamId::from(1),
        vec![ResponseUnit::Headers(response(200)), ResponseUnit::End],
    )
    .unwrap();

    assert!(conn.is_closed());
}

#[test]
fn priority_frames_are_parsed_and_ignored() {
    let mut conn = handshake(Config::default());

    let mut payload = vec![];
    payload.extend_from_slice(&3u32.to_be_bytes());
    payload.push(16);
    conn.on_bytes(&frame(PRIORITY, 0, 1, &payload)).unwrap();
    assert!(conn.take_output().is_empty());
    assert!(!conn.is_closed());

    // Except a stream depending on itself, which is an error.
    let mut payload = vec![];
    payload.extend_from_slice(&5u32.to_be_bytes());
    payload.push(16);
    conn.on_bytes(&frame(PRIORITY, 0, 5, &payload)).unwrap();
    let frames = parse_frames(&conn.take_output());
    assert!(frames.iter().any(|f| f.kind == RST_STREAM));
}

#[test]
fn oversized_frames_are_a_frame_size_error() {
    let mut conn = handshake(Config::default());

    // Claim a frame bigger than the advertised max frame size.
    let mut head = vec![0xff, 0xff, 0xff, DATA, 0, 0, 0, 0, 1];
    head.extend_from_slice(&[0; 16]);
    conn.on_bytes(&head).unwrap();

    let frames = parse_frames(&conn.take_output());
    let goaway = frames.iter().find(|f| f.kind == GOAWAY).expect("GOAWAY");
    // FRAME_SIZE_ERROR
    assert_eq!(&goaway.payload[4..8], &6u32.to_be_bytes());
}

#[tokio::test]
async fn serve_drives_a_transport_end_to_end() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut host = Host::new("example.com", 443);
    let mut route = Route::new();
    route.set_pattern("^/hello$", 0);
    route.set_target("write", "200 \"hi there\"").unwrap();
    host.add_route(route);
    let host = Arc::new(host);

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(trellis::server::serve(server, host));

    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&settings_frame(&[]));
    bytes.extend_from_slice(&settings_ack());
    bytes.extend_from_slice(&get_request(1, "/hello"));
    client.write_all(&bytes).await.unwrap();

    // Read until the response body arrives.
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let body = loop {
        let n = client.read(&mut buf).await.unwrap();
        assert!(n > 0, "transport closed before a response arrived");
        collected.extend_from_slice(&buf[..n]);

        let frames = parse_frames_lossy(&collected);
        if let Some(body) = frames
            .iter()
            .find(|f| f.kind == DATA && !f.payload.is_empty())
        {
            break body.payload.clone();
        }
    };

    assert_eq!(body, b"hi there");

    // Tell the server to finish up.
    client.write_all(&go_away(1, 0)).await.unwrap();
    client.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

/// Like `parse_frames` but tolerates a trailing partial frame.
fn parse_frames_lossy(mut src: &[u8]) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    while src.len() >= 9 {
        let len = ((src[0] as usize) << 16) | ((src[1] as usize) << 8) | src[2] as usize;
        if src.len() < 9 + len {
            break;
        }
        frames.push(RawFrame {
            kind: src[3],
            flags: src[4],
            stream_id: u32::from_be_bytes([src[5], src[6], src[7], src[8]]) & 0x7fff_ffff,
            payload: src[9..9 + len].to_vec(),
        });
        src = &src[9 + len..];
    }
    frames
}
