//! Unit tests for the newline-framed KQML codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use companions_agent::kqml::codec::{KqmlCodec, Line, MAX_LINE_BYTES};
use companions_agent::AppError;

fn next_text(codec: &mut KqmlCodec, buf: &mut BytesMut) -> Option<String> {
    codec
        .decode(buf)
        .expect("decode must succeed")
        .map(|line| line.expect("line must be valid"))
}

fn assert_malformed(frame: Line, needle: &str) {
    match frame {
        Err(AppError::MalformedMessage(msg)) => assert!(msg.contains(needle), "{msg}"),
        other => panic!("expected MalformedMessage, got {other:?}"),
    }
}

/// A complete line decodes without its trailing newline.
#[test]
fn decodes_one_line() {
    let mut codec = KqmlCodec::new();
    let mut buf = BytesMut::from("(ping :sender facilitator)\n");
    let line = next_text(&mut codec, &mut buf);
    assert_eq!(line.as_deref(), Some("(ping :sender facilitator)"));
    assert!(buf.is_empty());
}

/// A partial line stays buffered until its newline arrives.
#[test]
fn partial_line_waits_for_newline() {
    let mut codec = KqmlCodec::new();
    let mut buf = BytesMut::from("(tell :sender a");
    assert!(codec.decode(&mut buf).expect("decode must succeed").is_none());

    buf.extend_from_slice(b" :content x)\n");
    let line = next_text(&mut codec, &mut buf);
    assert_eq!(line.as_deref(), Some("(tell :sender a :content x)"));
}

/// Two messages in one read decode separately.
#[test]
fn batched_lines_decode_separately() {
    let mut codec = KqmlCodec::new();
    let mut buf = BytesMut::from("(ping)\n(tell :content x)\n");
    assert_eq!(next_text(&mut codec, &mut buf).as_deref(), Some("(ping)"));
    assert_eq!(
        next_text(&mut codec, &mut buf).as_deref(),
        Some("(tell :content x)")
    );
    assert!(codec.decode(&mut buf).expect("drained").is_none());
}

/// An overlong line is dropped as it arrives and reported once its newline
/// shows up; the following line still decodes.
#[test]
fn overlong_line_is_one_malformed_frame() {
    let mut codec = KqmlCodec::new();
    let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_BYTES + 10].as_slice());
    assert!(codec.decode(&mut buf).expect("decode must succeed").is_none());
    assert!(buf.is_empty(), "over-long bytes are not buffered");

    buf.extend_from_slice(b"aaaa\n(ping)\n");
    let frame = codec
        .decode(&mut buf)
        .expect("decode must succeed")
        .expect("one frame for the long line");
    assert_malformed(frame, "line too long");
    assert_eq!(next_text(&mut codec, &mut buf).as_deref(), Some("(ping)"));
}

/// A long line delivered in one read is rejected the same way.
#[test]
fn overlong_line_in_one_read_is_malformed() {
    let mut codec = KqmlCodec::new();
    let mut raw = vec![b'a'; MAX_LINE_BYTES + 1];
    raw.extend_from_slice(b"\n(ping)\n");
    let mut buf = BytesMut::from(raw.as_slice());
    let frame = codec
        .decode(&mut buf)
        .expect("decode must succeed")
        .expect("frame");
    assert_malformed(frame, "line too long");
    assert_eq!(next_text(&mut codec, &mut buf).as_deref(), Some("(ping)"));
}

/// Invalid UTF-8 spoils its own line only.
#[test]
fn invalid_utf8_is_malformed_frame() {
    let mut codec = KqmlCodec::new();
    let mut buf = BytesMut::from(&b"(tell :content \xff\xfe)\n(ping)\n"[..]);
    let frame = codec
        .decode(&mut buf)
        .expect("decode must succeed")
        .expect("frame");
    assert_malformed(frame, "utf-8");
    assert_eq!(next_text(&mut codec, &mut buf).as_deref(), Some("(ping)"));
}

/// A final line without a newline is still delivered at end of stream.
#[test]
fn unterminated_last_line_decodes_at_eof() {
    let mut codec = KqmlCodec::new();
    let mut buf = BytesMut::from("(ping)");
    let frame = codec
        .decode_eof(&mut buf)
        .expect("decode must succeed")
        .expect("frame");
    assert_eq!(frame.expect("valid line"), "(ping)");
    assert!(codec.decode_eof(&mut buf).expect("drained").is_none());
}

/// Encoding appends the newline terminator.
#[test]
fn encode_appends_newline() {
    let mut codec = KqmlCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode("(update :sender me)".to_owned(), &mut buf)
        .expect("encode must succeed");
    assert_eq!(&buf[..], b"(update :sender me)\n");
}
