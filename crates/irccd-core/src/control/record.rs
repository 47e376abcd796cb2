//! Control record wire format.
//!
//! A record is a fixed-size buffer: byte 0 is the action code, the rest is
//! the payload, NUL-padded to the record size. Both the control server
//! (daemon) and client (CLI) use these types.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The closed set of control actions and their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Join,
    Part,
    List,
    Write,
    Nick,
    Connect,
    Ping,
    Disconnect,
    Quit,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Join,
        Action::Part,
        Action::List,
        Action::Write,
        Action::Nick,
        Action::Connect,
        Action::Ping,
        Action::Disconnect,
        Action::Quit,
    ];

    pub fn code(self) -> u8 {
        match self {
            Action::Join => b'J',
            Action::Part => b'P',
            Action::List => b'L',
            Action::Write => b'W',
            Action::Nick => b'N',
            Action::Connect => b'C',
            Action::Ping => b'G',
            Action::Disconnect => b'D',
            Action::Quit => b'Q',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.code() == code)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One decoded unit from the control channel.
///
/// The code is kept raw so an unknown action survives decoding and can be
/// reported by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub code: u8,
    pub payload: String,
}

impl ControlRecord {
    pub fn new(action: Action, payload: impl Into<String>) -> Self {
        Self {
            code: action.code(),
            payload: payload.into(),
        }
    }

    pub fn action(&self) -> Option<Action> {
        Action::from_code(self.code)
    }

    /// Serialize into exactly `record_size` bytes.
    ///
    /// At least one NUL byte always follows the payload, so a reader can
    /// tell a complete record from one that overflowed.
    pub fn encode(&self, record_size: usize) -> Result<Bytes, RecordError> {
        let max = record_size.saturating_sub(2);
        if self.payload.len() > max {
            return Err(RecordError::Oversized {
                len: self.payload.len(),
                max,
            });
        }
        if self.payload.contains('\0') {
            return Err(RecordError::EmbeddedNul);
        }
        let mut buf = BytesMut::zeroed(record_size);
        buf[0] = self.code;
        buf[1..=self.payload.len()].copy_from_slice(self.payload.as_bytes());
        Ok(buf.freeze())
    }

    /// Parse one record. `raw` may be shorter than the record size, in which
    /// case the missing tail counts as NUL padding.
    pub fn parse(raw: &[u8]) -> Result<Self, RecordError> {
        let Some((&code, rest)) = raw.split_first() else {
            return Err(RecordError::Empty);
        };
        if code == 0 {
            return Err(RecordError::Empty);
        }

        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        if rest[end..].iter().any(|b| *b != 0) {
            return Err(RecordError::TrailingData);
        }

        let payload = std::str::from_utf8(&rest[..end]).map_err(|_| RecordError::InvalidUtf8)?;
        // Shell writers (`echo J#chan > ...`) append a newline.
        let payload = payload.trim_end_matches(['\r', '\n']);
        if payload.contains(['\r', '\n']) {
            return Err(RecordError::EmbeddedNewline);
        }

        Ok(Self {
            code,
            payload: payload.to_string(),
        })
    }
}

/// Why a control record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("empty control record")]
    Empty,

    #[error("payload of {len} bytes exceeds the {max}-byte record payload")]
    Oversized { len: usize, max: usize },

    #[error("record fills all {size} bytes with no NUL padding")]
    Unterminated { size: usize },

    #[error("payload contains a NUL byte")]
    EmbeddedNul,

    #[error("data follows the NUL padding")]
    TrailingData,

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload spans more than one line")]
    EmbeddedNewline,
}

/// Frames a control stream into fixed-size records.
///
/// Each item is the parse result for one record, so a malformed record is
/// rejected without closing the stream. A full-size record with no NUL
/// padding is reported as [`RecordError::Unterminated`]; record boundaries
/// are lost at that point, so the rest of the stream is discarded.
#[derive(Debug, Clone)]
pub struct ControlCodec {
    record_size: usize,
    overflowed: bool,
}

impl ControlCodec {
    pub fn new(record_size: usize) -> Self {
        Self {
            record_size,
            overflowed: false,
        }
    }
}

impl Decoder for ControlCodec {
    type Item = Result<ControlRecord, RecordError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.overflowed {
            src.clear();
            return Ok(None);
        }
        if src.len() < self.record_size {
            return Ok(None);
        }
        let raw = src.split_to(self.record_size);
        if !raw[1..].contains(&0) {
            self.overflowed = true;
            src.clear();
            return Ok(Some(Err(RecordError::Unterminated {
                size: self.record_size,
            })));
        }
        Ok(Some(ControlRecord::parse(&raw)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if self.overflowed || src.is_empty() {
            return Ok(None);
        }
        // A short final record: the writer skipped the padding.
        let raw = src.split();
        Ok(Some(ControlRecord::parse(&raw)))
    }
}

impl Encoder<&ControlRecord> for ControlCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: &ControlRecord, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item
            .encode(self.record_size)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
