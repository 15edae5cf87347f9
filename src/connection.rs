use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::codec::{self, MessageCodec};
use crate::message::Message;

/// Framed message I/O over one stream. Only whole messages are ever handed out, partial frames
/// stay in the read buffer until the rest arrives.
pub struct Connection<S = TcpStream> {
    framed: Framed<S, MessageCodec>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, codec: MessageCodec) -> Connection<S> {
        Connection {
            framed: Framed::new(stream, codec),
        }
    }

    /// A connection that reads client commands.
    pub fn client(stream: S) -> Connection<S> {
        Connection::new(stream, MessageCodec::request())
    }

    /// A connection that reads backend replies.
    pub fn backend(stream: S) -> Connection<S> {
        Connection::new(stream, MessageCodec::reply())
    }

    /// Waits for the next complete message. `None` means the peer closed the connection cleanly.
    pub async fn read_message(&mut self) -> Result<Option<Message>, codec::Error> {
        self.framed.next().await.transpose()
    }

    /// Writes the exact bytes of `message` and flushes them.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), codec::Error> {
        self.framed.send(message).await
    }
}
