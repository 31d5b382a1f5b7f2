//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server replies for the
//! request/response protocol spoken by the key-value server.
//!
//! ## Design Principles
//! 1. **Builder Commands**: `Command` collects a name plus positional
//!    arguments, each already rendered to bytes.
//! 2. **Buffer Reuse**: Callers provide the line buffer to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are carried as `Bytes`.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::fmt;
use std::io::{BufRead, Read};

use bytes::Bytes;

use crate::error::{WrapperError, WrapperResult};

/// Reply value returned by the server for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Null bulk string or null array (`$-1`, `*-1`).
    Nil,
    /// +OK or +PONG style replies.
    Status(Bytes),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings.
    Bulk(Bytes),
    /// *... arrays.
    Array(Vec<Reply>),
    /// -ERR ... replies.
    Error(Bytes),
}

impl Reply {
    /// Returns true for the nil reply.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Turns a top-level error reply into [`WrapperError::Server`].
    pub fn into_result(self) -> WrapperResult<Reply> {
        match self {
            Reply::Error(message) => Err(WrapperError::Server(
                String::from_utf8_lossy(&message).into_owned(),
            )),
            other => Ok(other),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "nil"),
            Reply::Status(text) | Reply::Bulk(text) | Reply::Error(text) => {
                write!(f, "{}", String::from_utf8_lossy(text))
            }
            Reply::Integer(value) => write!(f, "{}", value),
            Reply::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Values that can be sent as a command argument.
pub trait ToArg {
    /// Appends the argument's wire bytes to `out`.
    fn write_arg(&self, out: &mut Vec<u8>);
}

impl ToArg for str {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToArg for String {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToArg for [u8] {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl ToArg for Vec<u8> {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl ToArg for Bytes {
    fn write_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

macro_rules! int_to_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn write_arg(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(self.to_string().as_bytes());
                }
            }
        )*
    };
}

int_to_arg!(i32, i64, u32, u64, usize);

impl<T: ToArg + ?Sized> ToArg for &T {
    fn write_arg(&self, out: &mut Vec<u8>) {
        (**self).write_arg(out);
    }
}

/// A single command: name followed by positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    parts: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with the given name, e.g. `"GET"`.
    pub fn new(name: &str) -> Self {
        Command {
            parts: vec![name.as_bytes().to_vec()],
        }
    }

    /// Appends one argument.
    pub fn arg<A: ToArg + ?Sized>(mut self, arg: &A) -> Self {
        let mut buf = Vec::new();
        arg.write_arg(&mut buf);
        self.parts.push(buf);
        self
    }

    /// Command name as sent on the wire.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.parts[0]).into_owned()
    }

    /// Arguments after the name.
    pub fn args(&self) -> impl Iterator<Item = &[u8]> {
        self.parts[1..].iter().map(Vec::as_slice)
    }

    /// Name and arguments, in wire order.
    pub fn parts(&self) -> impl Iterator<Item = &[u8]> {
        self.parts.iter().map(Vec::as_slice)
    }
}

/// Encodes a command as a RESP2 array of bulk strings into `out`.
pub fn encode_command(command: &Command, out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, command.parts.len());
    out.extend_from_slice(b"\r\n");
    for part in command.parts() {
        out.push(b'$');
        push_usize(out, part.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
}

/// Largest bulk payload accepted from the server (Redis `proto-max-bulk-len`).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Deepest array nesting accepted from the server.
const MAX_NESTING: usize = 64;
/// Upper bound on up-front element reservation for arrays.
const ARRAY_PREALLOC: usize = 64;

/// Reads one reply from the buffered reader.
///
/// Lengths sent by the server are checked before anything is allocated:
/// bulk strings above 512 MiB and arrays nested more than 64 levels deep
/// are protocol errors.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> WrapperResult<Reply> {
    read_reply_at(reader, line_buf, 0)
}

fn read_reply_at<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> WrapperResult<Reply> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(WrapperError::Protocol("empty reply line".into()));
    }

    match line_buf[0] {
        b'+' => Ok(Reply::Status(Bytes::copy_from_slice(&line_buf[1..]))),
        b'-' => Ok(Reply::Error(Bytes::copy_from_slice(&line_buf[1..]))),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            read_array(reader, len, line_buf, depth)
        }
        other => Err(WrapperError::Protocol(format!(
            "unknown reply type byte {:?}",
            other as char
        ))),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> WrapperResult<Reply> {
    if len < 0 {
        return Ok(Reply::Nil);
    }
    if len > MAX_BULK_LEN {
        return Err(WrapperError::Protocol(format!(
            "bulk length {len} exceeds {MAX_BULK_LEN}"
        )));
    }

    // The buffer grows with the bytes actually received, not the declared length.
    let mut data = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() as u64 != len as u64 {
        return Err(WrapperError::Protocol(format!(
            "bulk string truncated after {} of {len} bytes",
            data.len()
        )));
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(WrapperError::Protocol("bulk string missing CRLF".into()));
    }
    Ok(Reply::Bulk(Bytes::from(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> WrapperResult<Reply> {
    if len < 0 {
        return Ok(Reply::Nil);
    }
    if depth >= MAX_NESTING {
        return Err(WrapperError::Protocol(format!(
            "arrays nested deeper than {MAX_NESTING}"
        )));
    }

    let mut items = Vec::with_capacity((len as u64).min(ARRAY_PREALLOC as u64) as usize);
    for _ in 0..len {
        items.push(read_reply_at(reader, line_buf, depth + 1)?);
    }
    Ok(Reply::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> WrapperResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(WrapperError::Protocol("connection closed by server".into()));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(WrapperError::Protocol("reply line missing CRLF".into()));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> WrapperResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| {
            WrapperError::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(data)
            ))
        })
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits go into a small stack buffer, then are copied out in order.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &[u8]) -> WrapperResult<Reply> {
        let mut reader = Cursor::new(raw.to_vec());
        let mut line = Vec::new();
        read_reply(&mut reader, &mut line)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&Command::new("GET").arg("key"), &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_mixed_arguments() {
        let mut buf = Vec::new();
        let command = Command::new("SETEX").arg("k").arg(&30u64).arg(b"v".as_slice());
        encode_command(&command, &mut buf);
        assert_eq!(&buf, b"*4\r\n$5\r\nSETEX\r\n$1\r\nk\r\n$2\r\n30\r\n$1\r\nv\r\n");
        assert_eq!(command.name(), "SETEX");
        assert_eq!(command.args().count(), 3);
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), Reply::Status(Bytes::from_static(b"OK")));
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").unwrap(),
            Reply::Bulk(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn parses_null_bulk_and_array() {
        assert_eq!(parse(b"$-1\r\n").unwrap(), Reply::Nil);
        assert_eq!(parse(b"*-1\r\n").unwrap(), Reply::Nil);
    }

    #[test]
    fn parses_integer() {
        assert_eq!(parse(b":-42\r\n").unwrap(), Reply::Integer(-42));
    }

    #[test]
    fn parses_nested_array() {
        let reply = parse(b"*2\r\n:1\r\n*1\r\n$1\r\nx\r\n").unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Integer(1),
                Reply::Array(vec![Reply::Bulk(Bytes::from_static(b"x"))]),
            ])
        );
        assert_eq!(reply.to_string(), "[1, [x]]");
    }

    #[test]
    fn error_reply_becomes_server_error() {
        let reply = parse(b"-ERR bad\r\n").unwrap();
        assert_eq!(reply, Reply::Error(Bytes::from_static(b"ERR bad")));
        assert!(matches!(reply.into_result(), Err(WrapperError::Server(msg)) if msg == "ERR bad"));
    }

    #[test]
    fn rejects_bad_framing() {
        assert!(matches!(parse(b"?huh\r\n"), Err(WrapperError::Protocol(_))));
        assert!(matches!(parse(b"+OK\n"), Err(WrapperError::Protocol(_))));
        assert!(matches!(parse(b":12a\r\n"), Err(WrapperError::Protocol(_))));
        assert!(matches!(parse(b""), Err(WrapperError::Protocol(_))));
        assert!(matches!(
            parse(b"*9223372036854775807\r\n"),
            Err(WrapperError::Protocol(_))
        ));
        assert!(matches!(
            parse(b"$9223372036854775807\r\n"),
            Err(WrapperError::Protocol(_))
        ));
        assert!(matches!(
            parse(&b"*1\r\n".repeat(100_000)),
            Err(WrapperError::Protocol(_))
        ));
    }

    #[test]
    fn rejects_truncated_bulk() {
        assert!(matches!(parse(b"$10\r\nabc"), Err(WrapperError::Protocol(_))));
    }

    #[test]
    fn accepts_nesting_up_to_the_limit() {
        let mut raw = b"*1\r\n".repeat(MAX_NESTING);
        raw.extend_from_slice(b":7\r\n");
        let mut reply = parse(&raw).unwrap();
        for _ in 0..MAX_NESTING {
            reply = match reply {
                Reply::Array(mut items) => items.remove(0),
                other => panic!("expected array, got {other:?}"),
            };
        }
        assert_eq!(reply, Reply::Integer(7));

        let mut too_deep = b"*1\r\n".repeat(MAX_NESTING + 1);
        too_deep.extend_from_slice(b":7\r\n");
        assert!(matches!(parse(&too_deep), Err(WrapperError::Protocol(_))));
    }
}
