//! IRC line codec.
//!
//! Outgoing commands are framed into [`Frame`]s that always end in `\r\n`
//! and never exceed [`MAX_LINE_LEN`] bytes. Incoming bytes are split into
//! [`Line`]s on `\n`, with a hard payload cap so a server that never sends a
//! terminator cannot grow the buffer without bound.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Maximum wire length of one line, terminator included (RFC 2812).
pub const MAX_LINE_LEN: usize = 512;

/// The two-byte line terminator.
pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Longest line body that still leaves room for the terminator.
pub const MAX_BODY_LEN: usize = MAX_LINE_LEN - TERMINATOR.len();

/// Errors raised while building or validating protocol lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed line: {0}")]
    MalformedLine(String),

    #[error("line is {0} bytes, exceeding the {MAX_LINE_LEN}-byte limit")]
    LineTooLong(usize),
}

/// An outgoing protocol line: at most [`MAX_LINE_LEN`] bytes, ending in `\r\n`.
///
/// Only [`frame`] and [`Frame::from_wire`] construct one, so every `Frame`
/// upholds the wire invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Validate an already terminated line.
    pub fn from_wire(raw: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        if raw.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong(raw.len()));
        }
        let Some(body) = raw.strip_suffix(TERMINATOR) else {
            return Err(ProtocolError::MalformedLine(
                "missing \\r\\n terminator".to_string(),
            ));
        };
        if body.is_empty() {
            return Err(ProtocolError::MalformedLine("empty line".to_string()));
        }
        if body.iter().any(|b| *b == b'\r' || *b == b'\n') {
            return Err(ProtocolError::MalformedLine(
                "embedded line break".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The line without its terminator, lossily decoded for display.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0[..self.0.len() - TERMINATOR.len()])
    }

}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Build a protocol line from a command and its arguments.
///
/// Parts are joined with single spaces; a trailing argument must carry its
/// own leading `:`. Bodies longer than [`MAX_BODY_LEN`] are truncated before
/// the terminator is appended, backing off to a character boundary so the
/// body stays valid UTF-8. NUL bytes pass through as data.
pub fn frame(command: &str, args: &[&str]) -> Result<Frame, ProtocolError> {
    if command.is_empty() || command.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(ProtocolError::MalformedLine(format!(
            "invalid command {command:?}"
        )));
    }
    if let Some(arg) = args.iter().find(|a| a.contains(['\r', '\n'])) {
        return Err(ProtocolError::MalformedLine(format!(
            "argument contains a line break: {arg:?}"
        )));
    }

    let body_len = command.len() + args.iter().map(|a| a.len() + 1).sum::<usize>();
    let mut body = String::with_capacity(body_len);
    body.push_str(command);
    for arg in args {
        body.push(' ');
        body.push_str(arg);
    }
    if body.len() > MAX_BODY_LEN {
        let cut = (0..=MAX_BODY_LEN)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
    }

    let mut buf = BytesMut::with_capacity(body.len() + TERMINATOR.len());
    buf.put_slice(body.as_bytes());
    buf.put_slice(TERMINATOR);

    Frame::from_wire(buf.freeze())
}

/// One incoming line exactly as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    raw: Bytes,
}

impl Line {
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Whether the line ended with `\n`; false when it was cut at the payload cap.
    pub fn is_terminated(&self) -> bool {
        self.raw.ends_with(b"\n")
    }

    /// The line with `\r\n` (or a bare `\n`) stripped, lossily decoded.
    pub fn text(&self) -> Cow<'_, str> {
        let body = self
            .raw
            .strip_suffix(b"\n")
            .map(|b| b.strip_suffix(b"\r").unwrap_or(b))
            .unwrap_or(&self.raw[..]);
        String::from_utf8_lossy(body)
    }

    /// If this is a server keepalive request, the argument text to echo back.
    ///
    /// Handles an optional `:prefix`. Everything after `PING ` is returned
    /// verbatim, so `PING :abc` yields `":abc"`.
    pub fn keepalive_args(&self) -> Option<String> {
        let text = self.text();
        let rest = match text.strip_prefix(':') {
            Some(prefixed) => prefixed.split_once(' ')?.1,
            None => text.as_ref(),
        };
        let (command, args) = rest.split_once(' ').unwrap_or((rest, ""));
        command
            .eq_ignore_ascii_case("PING")
            .then(|| args.to_string())
    }
}

/// Pull one line off the front of `buf`.
///
/// Consumes through the first `\n` found within [`MAX_LINE_LEN`] bytes.
/// When a full line's worth of bytes holds no terminator, the first
/// [`MAX_BODY_LEN`] bytes are emitted as a truncated line. Returns `None`
/// when more input is needed; the remainder stays in `buf`.
pub fn extract_line(buf: &mut BytesMut) -> Option<Line> {
    let window = buf.len().min(MAX_LINE_LEN);
    if let Some(pos) = buf[..window].iter().position(|b| *b == b'\n') {
        return Some(Line {
            raw: buf.split_to(pos + 1).freeze(),
        });
    }
    if buf.len() >= MAX_LINE_LEN {
        warn!(
            buffered = buf.len(),
            "no terminator within {MAX_LINE_LEN} bytes; truncating line"
        );
        return Some(Line {
            raw: buf.split_to(MAX_BODY_LEN).freeze(),
        });
    }
    None
}

/// A tokio codec speaking the line discipline above.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCodec;

impl LineCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(extract_line(src))
    }
}

impl Encoder<Frame> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Framing ──────────────────────────────────────────────────

    #[test]
    fn frame_joins_parts_and_terminates() {
        let f = frame("USER", &["user", "8", "*", ":Real Name"]).unwrap();
        assert_eq!(f.as_bytes(), b"USER user 8 * :Real Name\r\n");
        assert_eq!(f.text(), "USER user 8 * :Real Name");
    }

    #[test]
    fn frame_without_args() {
        assert_eq!(frame("QUIT", &[]).unwrap().as_bytes(), b"QUIT\r\n");
    }

    #[test]
    fn frame_truncates_body_not_terminator() {
        let long = format!(":{}", "x".repeat(1000));
        let f = frame("PRIVMSG", &["#test", &long]).unwrap();
        assert_eq!(f.len(), MAX_LINE_LEN);
        assert!(f.as_bytes().ends_with(TERMINATOR));
        assert!(f.as_bytes().starts_with(b"PRIVMSG #test :xxx"));
    }

    #[test]
    fn frame_truncation_keeps_whole_characters() {
        // "é" is two bytes; the 510-byte cut lands in the middle of one.
        let text = format!(":{}", "é".repeat(300));
        let f = frame("PRIVMSG", &["#test", &text]).unwrap();
        assert_eq!(f.len(), MAX_LINE_LEN - 1);
        let body = std::str::from_utf8(&f.as_bytes()[..f.len() - TERMINATOR.len()]).unwrap();
        assert!(body.ends_with('é'));
    }

    #[test]
    fn frame_exactly_at_limit_is_untouched() {
        let arg = "y".repeat(MAX_BODY_LEN - "PING ".len());
        let f = frame("PING", &[&arg]).unwrap();
        assert_eq!(f.len(), MAX_LINE_LEN);
        assert_eq!(&f.as_bytes()[5..MAX_BODY_LEN], arg.as_bytes());
    }

    #[test]
    fn frame_bounds_hold_for_many_lengths() {
        for n in [0, 1, 100, 498, 499, 500, 501, 502, 509, 510, 511, 4096] {
            let arg = "z".repeat(n);
            let f = frame("LIST", &[&arg]).unwrap();
            assert!(f.len() <= MAX_LINE_LEN, "length {n} produced {}", f.len());
            assert!(f.as_bytes().ends_with(TERMINATOR));
        }
    }

    #[test]
    fn frame_rejects_embedded_line_breaks() {
        let err = frame("PRIVMSG", &["#a", ":hi\r\nQUIT"]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedLine(_)));
        assert!(frame("JOIN", &["#a\n"]).is_err());
    }

    #[test]
    fn frame_rejects_bad_command() {
        assert!(frame("", &["x"]).is_err());
        assert!(frame("PRIV MSG", &[]).is_err());
    }

    #[test]
    fn frame_keeps_nul_as_data() {
        let f = frame("PRIVMSG", &["#a", ":a\0b"]).unwrap();
        assert_eq!(f.as_bytes(), b"PRIVMSG #a :a\0b\r\n");
    }

    #[test]
    fn from_wire_validates() {
        assert!(Frame::from_wire(&b"NICK user\r\n"[..]).is_ok());
        assert_eq!(
            Frame::from_wire(vec![b'a'; 600]).unwrap_err(),
            ProtocolError::LineTooLong(600)
        );
        assert!(matches!(
            Frame::from_wire(&b"NICK user"[..]),
            Err(ProtocolError::MalformedLine(_))
        ));
        assert!(Frame::from_wire(&b"\r\n"[..]).is_err());
        assert!(Frame::from_wire(&b"A\r\nB\r\n"[..]).is_err());
    }

    // ── Extraction ───────────────────────────────────────────────

    #[test]
    fn extract_round_trips_a_frame() {
        for cmd in [
            frame("NICK", &["user"]).unwrap(),
            frame("PRIVMSG", &["#test", &format!(":{}", "q".repeat(700))]).unwrap(),
        ] {
            let mut buf = BytesMut::from(cmd.as_bytes());
            let line = extract_line(&mut buf).unwrap();
            assert_eq!(line.as_bytes(), cmd.as_bytes());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn extract_waits_for_terminator() {
        let mut buf = BytesMut::from(&b"PING :ab"[..]);
        assert!(extract_line(&mut buf).is_none());
        buf.extend_from_slice(b"c\r\nNOTICE");
        let line = extract_line(&mut buf).unwrap();
        assert_eq!(line.text(), "PING :abc");
        assert_eq!(&buf[..], b"NOTICE");
    }

    #[test]
    fn extract_yields_successive_lines() {
        let mut buf = BytesMut::from(&b"one\r\ntwo\nthree\r\n"[..]);
        let texts: Vec<String> = std::iter::from_fn(|| extract_line(&mut buf))
            .map(|l| l.text().into_owned())
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn extract_caps_unterminated_payload() {
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LEN + 20].as_slice());
        let line = extract_line(&mut buf).unwrap();
        assert_eq!(line.as_bytes().len(), MAX_BODY_LEN);
        assert!(!line.is_terminated());
        assert_eq!(buf.len(), MAX_LINE_LEN + 20 - MAX_BODY_LEN);
    }

    #[test]
    fn extract_treats_nul_as_data() {
        let mut buf = BytesMut::from(&b"A\0B\r\n"[..]);
        assert_eq!(extract_line(&mut buf).unwrap().as_bytes(), b"A\0B\r\n");
    }

    // ── Keepalive detection ──────────────────────────────────────

    #[test]
    fn keepalive_args_echo_remainder() {
        let mut buf = BytesMut::from(&b"PING :abc\r\n"[..]);
        let line = extract_line(&mut buf).unwrap();
        assert_eq!(line.keepalive_args().as_deref(), Some(":abc"));
    }

    #[test]
    fn keepalive_with_prefix_and_extra_args() {
        let mut buf = BytesMut::from(&b":irc.example.net PING irc.example.net :tok en\r\n"[..]);
        let line = extract_line(&mut buf).unwrap();
        assert_eq!(
            line.keepalive_args().as_deref(),
            Some("irc.example.net :tok en")
        );
    }

    #[test]
    fn keepalive_without_args() {
        let mut buf = BytesMut::from(&b"PING\r\n"[..]);
        assert_eq!(extract_line(&mut buf).unwrap().keepalive_args().as_deref(), Some(""));
    }

    #[test]
    fn non_keepalive_lines_are_not_matched() {
        let mut buf =
            BytesMut::from(&b":nick!u@h PRIVMSG #a :PING me\r\n:srv PONG srv :x\r\n"[..]);
        assert!(extract_line(&mut buf).unwrap().keepalive_args().is_none());
        assert!(extract_line(&mut buf).unwrap().keepalive_args().is_none());
    }

    // ── Codec trait impls ────────────────────────────────────────

    #[test]
    fn codec_encodes_frames_verbatim() {
        let mut codec = LineCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(frame("JOIN", &["#test"]).unwrap(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"JOIN #test\r\n");
        let line = codec.decode(&mut dst).unwrap().unwrap();
        assert_eq!(line.text(), "JOIN #test");
    }
}
