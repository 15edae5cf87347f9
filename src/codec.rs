use bytes::{Buf, BytesMut};
use std::env;
use std::io;
use std::io::Cursor;
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, Frame, CRLF};
use crate::message::{Message, ProtocolError};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("frame size {size} exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },
}

/// Which side of the proxy a codec talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Reads commands sent by clients: RESP arrays, status lines or inline commands.
    Request,
    /// Reads whatever reply frame a backend sends.
    Reply,
}

pub struct MessageCodec {
    direction: Direction,
    max_frame_size: usize,
    scan: RequestScan,
}

/// How far a partially received request array has been measured. Kept between `decode` calls
/// so every byte of a request is scanned once, however many reads it arrives in.
#[derive(Debug, Default, PartialEq)]
struct RequestScan {
    /// Bulk strings still expected. `None` until the array header has been read.
    remaining: Option<usize>,
    /// Offset of the first byte that has not been scanned yet.
    offset: usize,
}

impl MessageCodec {
    pub fn new(direction: Direction) -> MessageCodec {
        MessageCodec {
            direction,
            max_frame_size: MessageCodec::max_frame_size(),
            scan: RequestScan::default(),
        }
    }

    pub fn request() -> MessageCodec {
        MessageCodec::new(Direction::Request)
    }

    pub fn reply() -> MessageCodec {
        MessageCodec::new(Direction::Reply)
    }

    fn max_frame_size() -> usize {
        env::var("MAX_FRAME_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(512 * 1024 * 1024)
    }

    /// Length of the request frame at the start of `src`.
    fn request_length(&mut self, src: &[u8]) -> Result<usize, ProtocolError> {
        match src.first() {
            Some(b'*') => self.array_length(src),
            Some(_) => src
                .iter()
                .position(|&b| b == b'\n')
                .map(|index| index + 1)
                .ok_or(ProtocolError::Incomplete),
            None => Err(ProtocolError::Incomplete),
        }
    }

    /// Measures a command array: `*<n>\r\n` followed by `n` bulk strings. Commands never nest,
    /// so anything but a bulk string inside the array is rejected as soon as it is seen.
    fn array_length(&mut self, src: &[u8]) -> Result<usize, ProtocolError> {
        let mut cursor = Cursor::new(src);

        let mut remaining = match self.scan.remaining {
            Some(remaining) => remaining,
            None => {
                cursor.set_position(1);
                let count = frame::get_length(&mut cursor)?
                    .ok_or_else(|| ProtocolError::Other("null array is not a command".into()))?;
                self.scan = RequestScan {
                    remaining: Some(count),
                    offset: cursor.position() as usize,
                };
                count
            }
        };

        while remaining > 0 {
            let start = self.scan.offset;
            match src.get(start) {
                Some(b'$') => {}
                Some(&other) => return Err(ProtocolError::InvalidDataType(other)),
                None => return Err(ProtocolError::Incomplete),
            }

            cursor.set_position(start as u64 + 1);
            let length = frame::get_length(&mut cursor)?
                .ok_or_else(|| ProtocolError::Other("null bulk string in command".into()))?;

            let end = cursor.position() as usize + length + CRLF.len();
            if src.len() < end {
                return Err(ProtocolError::Incomplete);
            }

            remaining -= 1;
            self.scan = RequestScan {
                remaining: Some(remaining),
                offset: end,
            };
        }

        Ok(self.scan.offset)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Check if the frame size exceeds a certain limit to prevent DoS attacks
            if src.len() > self.max_frame_size {
                return Err(Error::FrameTooLarge {
                    size: src.len(),
                    limit: self.max_frame_size,
                });
            }

            let length = match self.direction {
                Direction::Request => self.request_length(&src[..]),
                Direction::Reply => Frame::check(&src[..]),
            };

            let length = match length {
                Ok(length) => length,
                // Not enough data to parse a frame.
                Err(frame::Error::Incomplete) => return Ok(None),
                Err(err) => {
                    self.scan = RequestScan::default();
                    return Err(err.into());
                }
            };
            self.scan = RequestScan::default();

            // Inline clients (e.g. telnet) may send blank lines between commands.
            if self.direction == Direction::Request
                && src[..length].iter().all(u8::is_ascii_whitespace)
            {
                src.advance(length);
                continue;
            }

            // Remove the parsed frame from the buffer.
            let raw = src.split_to(length).freeze();

            let message = match self.direction {
                Direction::Request => Message::from_bytes(raw)?,
                Direction::Reply => Message::reply(raw),
            };

            return Ok(Some(message));
        }
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(message.length());
        message.write_to(dst);
        Ok(())
    }
}
