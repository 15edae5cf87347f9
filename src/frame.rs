// https://redis.io/docs/reference/protocol-spec

use bytes::Buf;
use bytes::Bytes;
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

pub(crate) static CRLF: &[u8; 2] = b"\r\n";

/// How deep aggregate replies may nest before the frame is rejected.
const MAX_DEPTH: usize = 128;

/// A malformed or empty protocol frame. A session that produces one is terminated, there is no
/// attempt to resynchronize mid-stream.
#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("protocol error; empty frame")]
    Empty,
    #[error("protocol error; invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("protocol error; invalid length {0:?}")]
    InvalidLength(String),
    #[error("protocol error; {0}")]
    Other(String),
}

/// A typed view over one reply frame. The proxy forwards replies byte-exact, this type is only
/// used to find where a reply ends and to interpret the few replies the proxy itself cares about
/// (e.g. the answer to `SELECT`).
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Boolean(bool),
    Double(String),
    BigNumber(String),
    Array(Vec<Frame>),
    Map(Vec<(Frame, Frame)>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        if depth > MAX_DEPTH {
            return Err(Error::Other(format!("frame nesting exceeds {} levels", MAX_DEPTH)));
        }

        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => Ok(Frame::Simple(get_line_string(src)?)),
            DataType::SimpleError => Ok(Frame::Error(get_line_string(src)?)),
            DataType::Integer => {
                let string = get_line_string(src)?;
                let integer = string
                    .parse::<i64>()
                    .map_err(|_| Error::InvalidLength(string))?;

                Ok(Frame::Integer(integer))
            }
            DataType::Boolean => match get_line(src)? {
                b"t" => Ok(Frame::Boolean(true)),
                b"f" => Ok(Frame::Boolean(false)),
                other => Err(Error::Other(format!(
                    "invalid boolean {:?}",
                    String::from_utf8_lossy(other)
                ))),
            },
            DataType::Double => Ok(Frame::Double(get_line_string(src)?)),
            DataType::BigNumber => Ok(Frame::BigNumber(get_line_string(src)?)),
            // $<length>\r\n<data>\r\n
            DataType::BulkString | DataType::VerbatimString => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(length) => Ok(Frame::Bulk(get_bulk(src, length)?)),
            },
            // !<length>\r\n<error>\r\n
            DataType::BulkError => match get_length(src)? {
                // NOTE: the protocol does not specify a way to represent a null bulk error
                None => Ok(Frame::Null),
                Some(length) => {
                    let msg = get_bulk(src, length)?;
                    Ok(Frame::Error(String::from_utf8(msg.to_vec())?))
                }
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array | DataType::Set | DataType::Push => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(length) => {
                    let mut frames = Vec::with_capacity(length.min(1024));
                    for _ in 0..length {
                        frames.push(Self::parse_nested(src, depth + 1)?);
                    }
                    Ok(Frame::Array(frames))
                }
            },
            // %<number-of-entries>\r\n<key-1><value-1>...<key-n><value-n>
            DataType::Map => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(length) => {
                    let mut entries = Vec::with_capacity(length.min(1024));
                    for _ in 0..length {
                        let key = Self::parse_nested(src, depth + 1)?;
                        let value = Self::parse_nested(src, depth + 1)?;
                        entries.push((key, value));
                    }
                    Ok(Frame::Map(entries))
                }
            },
            DataType::Null => {
                // Advance the cursor to the end of the frame.
                get_line(src)?;
                Ok(Frame::Null)
            }
        }
    }

    /// Returns the number of bytes the frame at the start of `src` occupies, without keeping the
    /// parsed value around.
    pub fn check(src: &[u8]) -> Result<usize, Error> {
        let mut cursor = Cursor::new(src);
        Self::parse(&mut cursor)?;
        usize::try_from(cursor.position()).map_err(|_| Error::Other("frame too large".into()))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Simple(s) if s == "OK")
    }
}

/// Reads up to the next CRLF and moves the cursor past it.
pub(crate) fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len();

    let line_end = src.get_ref()[start..end]
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)
        .map(|index| start + index)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&src.get_ref()[start..line_end])
}

fn get_line_string(src: &mut Cursor<&[u8]>) -> Result<String, Error> {
    Ok(String::from_utf8(get_line(src)?.to_vec())?)
}

/// Reads a length header. `-1` is the RESP2 null marker and maps to `None`.
pub(crate) fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    let line = get_line(src)?;
    let text = std::str::from_utf8(line).map_err(|_| invalid_length(line))?;

    match text.parse::<isize>() {
        Ok(-1) => Ok(None),
        Ok(length) => usize::try_from(length)
            .map(Some)
            .map_err(|_| invalid_length(line)),
        Err(_) => Err(invalid_length(line)),
    }
}

/// Reads exactly `length` bytes followed by CRLF. Bulk data may itself contain CRLF, so this
/// does not scan for the terminator.
fn get_bulk(src: &mut Cursor<&[u8]>, length: usize) -> Result<Bytes, Error> {
    let start = src.position() as usize;
    let end = start + length;

    if src.get_ref().len() < end + CRLF.len() {
        return Err(Error::Incomplete);
    }
    if &src.get_ref()[end..end + CRLF.len()] != CRLF {
        return Err(Error::Other("bulk string is not terminated by CRLF".into()));
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(Bytes::copy_from_slice(&src.get_ref()[start..end]))
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

fn invalid_length(line: &[u8]) -> Error {
    Error::InvalidLength(String::from_utf8_lossy(line).into_owned())
}

#[derive(Debug)]
enum DataType {
    SimpleString,   // '+'
    BulkString,     // '$'
    VerbatimString, // '='
    SimpleError,    // '-'
    BulkError,      // '!'
    Boolean,        // '#'
    Integer,        // ':'
    Double,         // ','
    BigNumber,      // '('
    Array,          // '*'
    Map,            // '%'
    Set,            // '~'
    Push,           // '>'
    Null,           // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'!' => Ok(Self::BulkError),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            b'#' => Ok(Self::Boolean),
            b',' => Ok(Self::Double),
            b'(' => Ok(Self::BigNumber),
            b'=' => Ok(Self::VerbatimString),
            b'%' => Ok(Self::Map),
            b'~' => Ok(Self::Set),
            b'>' => Ok(Self::Push),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        Error::Other("invalid frame format".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(data);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn parse_simple_string_frame() {
        let frame = parse(b"+OK\r\n");

        assert!(matches!(frame, Ok(Frame::Simple(ref s)) if s == "OK"));
        assert!(frame.unwrap().is_ok());
    }

    #[test]
    fn parse_simple_error_frame() {
        let frame = parse(b"-Error message\r\n");

        assert!(matches!(
            frame,
            Ok(Frame::Error(ref s)) if s == "Error message"
        ));
    }

    #[test]
    fn parse_integer_frame() {
        assert_eq!(parse(b":1000\r\n"), Ok(Frame::Integer(1000)));
        assert_eq!(parse(b":-1000\r\n"), Ok(Frame::Integer(-1000)));
        assert_eq!(parse(b":+7\r\n"), Ok(Frame::Integer(7)));
    }

    #[test]
    fn parse_bulk_string_frame_with_embedded_crlf() {
        let frame = parse(b"$8\r\nfoo\r\nbar\r\n");

        assert_eq!(frame, Ok(Frame::Bulk(Bytes::from("foo\r\nbar"))));
    }

    #[test]
    fn parse_bulk_string_frame_null() {
        assert_eq!(parse(b"$-1\r\n"), Ok(Frame::Null));
    }

    #[test]
    fn parse_bulk_string_frame_incomplete() {
        assert_eq!(parse(b"$6\r\nfoo"), Err(Error::Incomplete));
        assert_eq!(parse(b"$6\r\nfoobar"), Err(Error::Incomplete));
    }

    #[test]
    fn parse_bulk_error_frame() {
        assert_eq!(
            parse(b"!6\r\nfoobar\r\n"),
            Ok(Frame::Error(String::from("foobar")))
        );
    }

    #[test]
    fn parse_array_frame_nested() {
        let frame = parse(b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Hello\r\n-World\r\n");

        assert_eq!(
            frame,
            Ok(Frame::Array(vec![
                Frame::Array(vec![
                    Frame::Integer(1),
                    Frame::Integer(2),
                    Frame::Integer(3)
                ]),
                Frame::Array(vec![
                    Frame::Simple("Hello".to_string()),
                    Frame::Error("World".to_string())
                ]),
            ]))
        );
    }

    #[test]
    fn parse_resp3_frames() {
        assert_eq!(parse(b"#t\r\n"), Ok(Frame::Boolean(true)));
        assert_eq!(parse(b",3.14\r\n"), Ok(Frame::Double("3.14".into())));
        assert_eq!(parse(b"_\r\n"), Ok(Frame::Null));
        assert_eq!(
            parse(b"%1\r\n+key\r\n:1\r\n"),
            Ok(Frame::Map(vec![(
                Frame::Simple("key".into()),
                Frame::Integer(1)
            )]))
        );
    }

    #[test]
    fn check_returns_frame_length() {
        let data = b"*2\r\n$3\r\nfoo\r\n:1\r\n+NEXT\r\n";

        assert_eq!(Frame::check(data), Ok(17));
    }

    #[test]
    fn parse_rejects_deeply_nested_frames() {
        let data = "*1\r\n".repeat(200_000) + ":1\r\n";

        assert!(matches!(parse(data.as_bytes()), Err(Error::Other(_))));

        let shallow = "*1\r\n".repeat(MAX_DEPTH) + ":1\r\n";
        assert!(parse(shallow.as_bytes()).is_ok());
    }

    #[test]
    fn parse_invalid_data_type() {
        assert_eq!(parse(b"?oops\r\n"), Err(Error::InvalidDataType(b'?')));
    }

    #[test]
    fn parse_invalid_length() {
        assert!(matches!(
            parse(b"*x\r\n"),
            Err(Error::InvalidLength(ref s)) if s == "x"
        ));
    }
}
