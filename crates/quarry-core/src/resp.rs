//! RESP2 frame codec
//!
//! Frames are decoded in two passes over a `Cursor`: [`Frame::check`] walks the
//! buffer without allocating to find out whether a whole frame is available,
//! then [`Frame::parse`] materialises it. This lets the connection keep
//! partial input in its read buffer until the rest arrives.

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;

/// Largest bulk string accepted from a peer (matches the Redis default)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest array accepted from a peer
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// Deepest array nesting accepted from a peer
pub const MAX_DEPTH: usize = 32;

/// Longest simple/error/integer line or length header accepted from a peer
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A RESP2 value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$3\r\nfoo\r\n`
    Bulk(Bytes),
    /// `$-1\r\n` (also decoded from `*-1\r\n`)
    Null,
    /// `*2\r\n...`
    Array(Vec<Frame>),
}

/// Decode failure
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not enough data buffered to decode a whole frame
    #[error("stream ended early")]
    Incomplete,
    /// The bytes cannot be a valid frame
    #[error("protocol error; {0}")]
    Invalid(String),
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::protocol(e.to_string())
    }
}

impl Frame {
    /// `+OK`
    pub fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    /// Bulk string from anything byte-like
    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(data.into())
    }

    /// Error reply with the standard `ERR` prefix
    pub fn err(msg: impl fmt::Display) -> Frame {
        Frame::Error(format!("ERR {}", msg))
    }

    /// Check whether a full frame can be decoded from `src`.
    ///
    /// On success the cursor is positioned one past the end of the frame.
    pub fn check(src: &mut Cursor<&[u8]>) -> std::result::Result<(), FrameError> {
        Self::check_nested(src, 0)
    }

    fn check_nested(src: &mut Cursor<&[u8]>, depth: usize) -> std::result::Result<(), FrameError> {
        match get_u8(src)? {
            b'+' | b'-' => {
                get_line(src)?;
                Ok(())
            }
            b':' => {
                get_decimal(src)?;
                Ok(())
            }
            b'$' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(());
                }
                let len = bulk_len(len)?;
                skip(src, len + 2)
            }
            b'*' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(());
                }
                let len = array_len(len)?;
                if len > 0 {
                    nested(depth)?;
                }
                for _ in 0..len {
                    Frame::check_nested(src, depth + 1)?;
                }
                Ok(())
            }
            other => Err(FrameError::Invalid(format!(
                "invalid frame type byte `{}`",
                other as char
            ))),
        }
    }

    /// Decode one frame. Must only be called after [`Frame::check`] succeeded.
    pub fn parse(src: &mut Cursor<&[u8]>) -> std::result::Result<Frame, FrameError> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> std::result::Result<Frame, FrameError> {
        match get_u8(src)? {
            b'+' => Ok(Frame::Simple(line_string(get_line(src)?)?)),
            b'-' => Ok(Frame::Error(line_string(get_line(src)?)?)),
            b':' => Ok(Frame::Integer(get_decimal(src)?)),
            b'$' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                let len = bulk_len(len)?;
                if src.remaining() < len + 2 {
                    return Err(FrameError::Incomplete);
                }
                let data = Bytes::copy_from_slice(&src.chunk()[..len]);
                if &src.chunk()[len..len + 2] != b"\r\n" {
                    return Err(FrameError::Invalid("bulk string not terminated".into()));
                }
                skip(src, len + 2)?;
                Ok(Frame::Bulk(data))
            }
            b'*' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                let len = array_len(len)?;
                if len > 0 {
                    nested(depth)?;
                }
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(Frame::parse_nested(src, depth + 1)?);
                }
                Ok(Frame::Array(items))
            }
            other => Err(FrameError::Invalid(format!(
                "invalid frame type byte `{}`",
                other as char
            ))),
        }
    }

    /// Serialize this frame onto `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(s) => {
                dst.put_u8(b'-');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_u8(b':');
                dst.put_slice(n.to_string().as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => put_bulk(dst, data),
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                dst.put_u8(b'*');
                dst.put_slice(items.len().to_string().as_bytes());
                dst.put_slice(b"\r\n");
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Interpret a request frame as a command argument vector.
    ///
    /// Requests must be a non-empty array of bulk (or simple) strings.
    /// Empty arguments are accepted here; the dispatcher rejects them with
    /// an error reply instead of dropping the connection.
    pub fn into_args(self) -> Result<Vec<Bytes>> {
        let items = match self {
            Frame::Array(items) if !items.is_empty() => items,
            Frame::Array(_) => return Err(Error::protocol("empty command")),
            other => {
                return Err(Error::protocol(format!(
                    "expected array of bulk strings, got {}",
                    other.kind()
                )));
            }
        };

        items
            .into_iter()
            .map(|item| match item {
                Frame::Bulk(data) => Ok(data),
                Frame::Simple(s) => Ok(Bytes::from(s)),
                other => Err(Error::protocol(format!(
                    "expected bulk string argument, got {}",
                    other.kind()
                ))),
            })
            .collect()
    }

    fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(_) => "bulk string",
            Frame::Null => "null",
            Frame::Array(_) => "array",
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => s.fmt(f),
            Frame::Error(s) => write!(f, "error: {}", s),
            Frame::Integer(n) => n.fmt(f),
            Frame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => s.fmt(f),
                Err(_) => write!(f, "{:?}", data),
            },
            Frame::Null => "(nil)".fmt(f),
            Frame::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    item.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

/// Encode a command as a RESP array of bulk strings, the form written into
/// the replication stream.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        put_bulk(&mut buf, arg.as_ref());
    }
    buf.freeze()
}

fn put_bulk(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u8(b'$');
    dst.put_slice(data.len().to_string().as_bytes());
    dst.put_slice(b"\r\n");
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

fn bulk_len(len: i64) -> std::result::Result<usize, FrameError> {
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(FrameError::Invalid(format!("invalid bulk length {}", len)));
    }
    Ok(len as usize)
}

fn array_len(len: i64) -> std::result::Result<usize, FrameError> {
    if !(0..=MAX_ARRAY_LEN).contains(&len) {
        return Err(FrameError::Invalid(format!("invalid array length {}", len)));
    }
    Ok(len as usize)
}

fn nested(depth: usize) -> std::result::Result<(), FrameError> {
    if depth >= MAX_DEPTH {
        return Err(FrameError::Invalid(format!(
            "arrays nested deeper than {}",
            MAX_DEPTH
        )));
    }
    Ok(())
}

fn get_u8(src: &mut Cursor<&[u8]>) -> std::result::Result<u8, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Incomplete);
    }
    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> std::result::Result<(), FrameError> {
    if src.remaining() < n {
        return Err(FrameError::Incomplete);
    }
    src.advance(n);
    Ok(())
}

fn get_decimal(src: &mut Cursor<&[u8]>) -> std::result::Result<i64, FrameError> {
    let line = get_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| FrameError::Invalid("invalid integer".into()))
}

/// A line is everything up to the next `\r\n`
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> std::result::Result<&'a [u8], FrameError> {
    let start = src.position() as usize;
    let buf = *src.get_ref();
    if buf.len() < 2 {
        return Err(FrameError::Incomplete);
    }

    let end = buf.len().min(start.saturating_add(MAX_LINE_LEN + 2));
    for i in start..end.saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&buf[start..i]);
        }
    }

    if buf.len() - start >= MAX_LINE_LEN + 2 {
        return Err(FrameError::Invalid(format!(
            "line longer than {} bytes",
            MAX_LINE_LEN
        )));
    }
    Err(FrameError::Incomplete)
}

fn line_string(line: &[u8]) -> std::result::Result<String, FrameError> {
    String::from_utf8(line.to_vec()).map_err(|_| FrameError::Invalid("invalid utf-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(input: &[u8]) -> std::result::Result<Frame, FrameError> {
        let mut cursor = Cursor::new(input);
        Frame::check(&mut cursor)?;
        let end = cursor.position();
        cursor.set_position(0);
        let frame = Frame::parse(&mut cursor)?;
        assert_eq!(cursor.position(), end);
        Ok(frame)
    }

    #[test]
    fn test_parse_command_array() {
        let frame = decode(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").unwrap();
        let args = frame.into_args().unwrap();
        assert_eq!(args, vec!["SET", "foo", "bar"]);
    }

    #[test]
    fn test_incomplete_frames() {
        assert!(matches!(decode(b""), Err(FrameError::Incomplete)));
        assert!(matches!(decode(b"*2\r\n$3\r\nGET"), Err(FrameError::Incomplete)));
        assert!(matches!(decode(b"$5\r\nhel"), Err(FrameError::Incomplete)));
        assert!(matches!(decode(b"+OK\r"), Err(FrameError::Incomplete)));
    }

    #[test]
    fn test_invalid_frames() {
        assert!(matches!(decode(b"?what\r\n"), Err(FrameError::Invalid(_))));
        assert!(matches!(decode(b"$-5\r\n"), Err(FrameError::Invalid(_))));
        assert!(matches!(decode(b":abc\r\n"), Err(FrameError::Invalid(_))));
    }

    #[test]
    fn test_null_and_scalars() {
        assert_eq!(decode(b"$-1\r\n").unwrap(), Frame::Null);
        assert_eq!(decode(b"*-1\r\n").unwrap(), Frame::Null);
        assert_eq!(decode(b":-7\r\n").unwrap(), Frame::Integer(-7));
        assert_eq!(
            decode(b"-ERR boom\r\n").unwrap(),
            Frame::Error("ERR boom".into())
        );
    }

    #[test]
    fn test_empty_bulk_is_kept_for_dispatcher() {
        let frame = decode(b"*2\r\n$3\r\nGET\r\n$0\r\n\r\n").unwrap();
        let args = frame.into_args().unwrap();
        assert_eq!(args.len(), 2);
        assert!(args[1].is_empty());
    }

    #[test]
    fn test_into_args_rejects_non_arrays() {
        assert!(Frame::Integer(1).into_args().is_err());
        assert!(Frame::Array(vec![]).into_args().is_err());
        assert!(
            Frame::Array(vec![Frame::Integer(1)])
                .into_args()
                .is_err()
        );
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let input = b"*1\r\n".repeat(500_000);
        assert!(matches!(decode(&input), Err(FrameError::Invalid(_))));

        let mut at_limit = b"*1\r\n".repeat(MAX_DEPTH);
        at_limit.extend_from_slice(b"*0\r\n");
        assert!(decode(&at_limit).is_ok());

        let mut over_limit = b"*1\r\n".repeat(MAX_DEPTH + 1);
        over_limit.extend_from_slice(b":1\r\n");
        assert!(matches!(decode(&over_limit), Err(FrameError::Invalid(_))));
    }

    #[test]
    fn test_unterminated_line_is_bounded() {
        let mut input = b"+".to_vec();
        input.extend(std::iter::repeat_n(b'a', MAX_LINE_LEN + 2));
        assert!(matches!(decode(&input), Err(FrameError::Invalid(_))));

        let mut input = b"+".to_vec();
        input.extend(std::iter::repeat_n(b'a', 100));
        assert!(matches!(decode(&input), Err(FrameError::Incomplete)));
    }

    #[test]
    fn test_encode_command_matches_frame_encoding() {
        let raw = encode_command(&["SELECT", "3"]);
        let frame = Frame::Array(vec![Frame::bulk("SELECT"), Frame::bulk("3")]);
        assert_eq!(raw, frame.to_bytes());
        assert_eq!(&raw[..], b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n");
    }

    #[test]
    fn test_encode_nested_reply() {
        let frame = Frame::Array(vec![Frame::Integer(1), Frame::Null, Frame::ok()]);
        assert_eq!(&frame.to_bytes()[..], b"*3\r\n:1\r\n$-1\r\n+OK\r\n");
    }
}
