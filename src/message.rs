use std::fmt;
use std::io::Cursor;

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{self, Frame, CRLF};

pub use crate::frame::Error as ProtocolError;

/// One `(header, payload)` pair of a wire message.
///
/// For a command word the header is its `$<len>\r\n` line and the payload is the word followed by
/// its terminator. For the leading array header and for replies the payload is empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segment {
    pub header: Bytes,
    pub payload: Bytes,
}

impl Segment {
    fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }
}

/// An immutable, byte-exact protocol frame: either a client command or a backend reply.
///
/// Concatenating every segment reproduces the exact bytes the message was built from, which is
/// what lets the proxy pass replies through without interpreting them.
///
/// Commands follow the "simple command array" grammar: segment 0 is the array header, segment 1
/// the command name and segment 2 the routing key. Anything that does not carry a key in that
/// position is not routable.
///
/// An absent message is represented by `Message::default()`, which has no segments, an empty
/// command name, no routing key and a length of zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Parses a complete frame.
    ///
    /// A line starting with `+` or `-` is kept verbatim as a single segment. A RESP array of bulk
    /// strings is split into one segment per word. Anything else is treated as an inline command:
    /// whitespace separated words, each reframed as a length-prefixed bulk string.
    pub fn parse(raw: &[u8]) -> Result<Message, ProtocolError> {
        Message::from_bytes(Bytes::copy_from_slice(raw))
    }

    pub(crate) fn from_bytes(raw: Bytes) -> Result<Message, ProtocolError> {
        match raw.first() {
            None => Err(ProtocolError::Empty),
            Some(b'+') | Some(b'-') => Ok(Message::reply(raw)),
            Some(b'*') => Message::from_array(raw),
            Some(_) => Message::from_inline(&raw),
        }
    }

    /// Wraps one complete reply frame. The bytes are kept as a single segment and are never
    /// interpreted again.
    pub(crate) fn reply(raw: Bytes) -> Message {
        Message {
            segments: vec![Segment {
                header: raw,
                payload: Bytes::new(),
            }],
        }
    }

    fn from_array(raw: Bytes) -> Result<Message, ProtocolError> {
        let mut cursor = Cursor::new(&raw[..]);
        cursor.set_position(1);

        let count = frame::get_length(&mut cursor)?
            .ok_or_else(|| ProtocolError::Other("null array is not a command".into()))?;

        let mut segments = Vec::with_capacity(count.min(1024) + 1);
        let mut start = cursor.position() as usize;
        segments.push(Segment {
            header: raw.slice(..start),
            payload: Bytes::new(),
        });

        for _ in 0..count {
            match raw.get(start) {
                Some(b'$') => {}
                Some(&other) => return Err(ProtocolError::InvalidDataType(other)),
                None => return Err(ProtocolError::Incomplete),
            }

            cursor.set_position(start as u64 + 1);
            let length = frame::get_length(&mut cursor)?
                .ok_or_else(|| ProtocolError::Other("null bulk string in command".into()))?;

            let header_end = cursor.position() as usize;
            let payload_end = header_end + length + CRLF.len();
            if raw.len() < payload_end {
                return Err(ProtocolError::Incomplete);
            }
            if &raw[payload_end - CRLF.len()..payload_end] != CRLF {
                return Err(ProtocolError::Other(
                    "bulk string is not terminated by CRLF".into(),
                ));
            }

            segments.push(Segment {
                header: raw.slice(start..header_end),
                payload: raw.slice(header_end..payload_end),
            });
            start = payload_end;
        }

        if start != raw.len() {
            return Err(ProtocolError::Other("trailing bytes after command".into()));
        }

        Ok(Message { segments })
    }

    fn from_inline(raw: &[u8]) -> Result<Message, ProtocolError> {
        let words: Vec<&[u8]> = raw
            .split(|b| b.is_ascii_whitespace())
            .filter(|word| !word.is_empty())
            .collect();

        if words.is_empty() {
            return Err(ProtocolError::Empty);
        }

        Ok(Message::command(words))
    }

    /// Builds a command from its words, framed as an array of bulk strings.
    pub fn command<I, W>(words: I) -> Message
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[u8]>,
    {
        let words: Vec<W> = words.into_iter().collect();
        let mut segments = Vec::with_capacity(words.len() + 1);

        segments.push(Segment {
            header: Bytes::from(format!("*{}\r\n", words.len())),
            payload: Bytes::new(),
        });

        for word in &words {
            let word = word.as_ref();
            let mut payload = BytesMut::with_capacity(word.len() + CRLF.len());
            payload.put_slice(word);
            payload.put_slice(CRLF);

            segments.push(Segment {
                header: Bytes::from(format!("${}\r\n", word.len())),
                payload: payload.freeze(),
            });
        }

        Message { segments }
    }

    /// Builds one aggregate array reply out of individual replies, in the given order.
    pub fn array<I>(replies: I) -> Message
    where
        I: IntoIterator<Item = Message>,
        I::IntoIter: ExactSizeIterator,
    {
        let replies = replies.into_iter();
        let mut segments = vec![Segment {
            header: Bytes::from(format!("*{}\r\n", replies.len())),
            payload: Bytes::new(),
        }];

        for reply in replies {
            segments.extend(reply.segments);
        }

        Message { segments }
    }

    pub fn status(text: &str) -> Message {
        Message::reply(Bytes::from(format!("+{}\r\n", text)))
    }

    /// An error reply. `text` should start with an error code, e.g. `ERR`.
    pub fn error(text: impl fmt::Display) -> Message {
        // A line break would split the reply into two frames.
        let text = text.to_string().replace(['\r', '\n'], " ");
        Message::reply(Bytes::from(format!("-{}\r\n", text)))
    }

    pub fn bulk(data: impl AsRef<[u8]>) -> Message {
        let data = data.as_ref();
        let mut raw = BytesMut::with_capacity(data.len() + 16);
        raw.put_slice(format!("${}\r\n", data.len()).as_bytes());
        raw.put_slice(data);
        raw.put_slice(CRLF);
        Message::reply(raw.freeze())
    }

    pub fn ok() -> Message {
        Message::status("OK")
    }

    pub fn queued() -> Message {
        Message::status("QUEUED")
    }

    pub fn pong() -> Message {
        Message::status("PONG")
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The upper-cased command name, or an empty string for a bare status/error line.
    pub fn command_name(&self) -> String {
        match self.segments.get(1) {
            Some(segment) => String::from_utf8_lossy(&segment.payload)
                .trim()
                .to_uppercase(),
            None => String::new(),
        }
    }

    pub fn has_routing_key(&self) -> bool {
        self.segments.len() >= 3
    }

    /// The first argument of a command, without its terminator. Empty when the message has
    /// fewer than three segments, use `has_routing_key` to tell that apart from an empty key.
    pub fn routing_key(&self) -> &[u8] {
        match self.segments.get(2) {
            Some(segment) => segment
                .payload
                .strip_suffix(CRLF)
                .unwrap_or(&segment.payload[..]),
            None => &[],
        }
    }

    /// Total number of bytes on the wire.
    pub fn length(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_error(&self) -> bool {
        self.first_byte() == Some(b'-')
    }

    /// Interprets the message as a reply frame, used for the few replies the proxy reads itself.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let bytes = self.serialize();
        let mut cursor = Cursor::new(&bytes[..]);
        Frame::parse(&mut cursor)
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        for segment in &self.segments {
            dst.put_slice(&segment.header);
            dst.put_slice(&segment.payload);
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(self.length());
        self.write_to(&mut bytes);
        debug_assert_eq!(bytes.len(), self.length());
        bytes.freeze()
    }

    fn first_byte(&self) -> Option<u8> {
        self.segments
            .iter()
            .flat_map(|segment| [&segment.header, &segment.payload])
            .find_map(|part| part.first().copied())
    }
}

impl From<Message> for Bytes {
    fn from(message: Message) -> Self {
        message.serialize()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.serialize()).trim_end())
    }
}
