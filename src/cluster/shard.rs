use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error as ThisError;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::ShardAddr;
use crate::connection::Connection;
use crate::message::Message;

#[derive(Debug, ThisError)]
pub enum BackendError {
    #[error("shard is not connected")]
    Disconnected,
    #[error("backend closed the connection")]
    ConnectionClosed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error("could not change to db {db}: {reply}")]
    Select { db: u32, reply: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ShardStatus {
    Disconnected = 0,
    Connected = 1,
    /// Declared for deployments that restrict what a replica serves. Nothing sets it yet.
    ReadOnly = 2,
    /// Declared for deployments that restrict what a replica serves. Nothing sets it yet.
    WriteOnly = 3,
}

impl ShardStatus {
    /// Whether a message may be executed on a shard in this state.
    pub fn is_available(self) -> bool {
        self == ShardStatus::Connected
    }

    fn from_u8(value: u8) -> ShardStatus {
        match value {
            1 => ShardStatus::Connected,
            2 => ShardStatus::ReadOnly,
            3 => ShardStatus::WriteOnly,
            _ => ShardStatus::Disconnected,
        }
    }
}

/// One backend connection and its health.
///
/// A backend connection is not multiplexed, so every round trip holds the shard lock for its
/// whole duration. Status only changes under that lock but is mirrored in an atomic, so reading
/// it never waits behind a round trip.
pub struct Shard {
    id: u64,
    addr: ShardAddr,
    status: AtomicU8,
    state: Mutex<State>,
}

struct State {
    last_error: Option<String>,
    conn: Option<Connection>,
}

impl Shard {
    pub fn new(addr: ShardAddr) -> Shard {
        Shard {
            id: addr.id(),
            addr,
            status: AtomicU8::new(ShardStatus::Disconnected as u8),
            state: Mutex::new(State {
                last_error: None,
                conn: None,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &ShardAddr {
        &self.addr
    }

    pub fn status(&self) -> ShardStatus {
        ShardStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ShardStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    /// Dials the backend and selects the configured db. Calling it on a connected shard drops
    /// the current connection and dials again.
    pub async fn connect(&self) -> ShardStatus {
        let mut state = self.state.lock().await;
        self.redial(&mut state).await
    }

    /// Like `connect`, but leaves a shard alone when it is already usable by the time the lock
    /// is acquired, e.g. because another session reconnected it first.
    pub async fn reconnect_if_down(&self) -> ShardStatus {
        let mut state = self.state.lock().await;

        match self.status() {
            status if status.is_available() => status,
            _ => self.redial(&mut state).await,
        }
    }

    async fn redial(&self, state: &mut State) -> ShardStatus {
        state.conn = None;
        self.set_status(ShardStatus::Disconnected);

        match self.dial().await {
            Ok(conn) => {
                info!("[shard {}] Connected on {}", self.id, self.addr);
                state.conn = Some(conn);
                self.set_status(ShardStatus::Connected);
            }
            Err(e) => {
                warn!("[shard {}] Could not connect to {}: {}", self.id, self.addr, e);
                state.last_error = Some(e.to_string());
            }
        }

        self.status()
    }

    async fn dial(&self) -> Result<Connection, BackendError> {
        let stream = TcpStream::connect((self.addr.host.as_str(), self.addr.port)).await?;
        let mut conn = Connection::backend(stream);

        let db = self.addr.db.to_string();
        let reply = round_trip(&mut conn, &Message::command(["SELECT", db.as_str()])).await?;

        match reply.to_frame() {
            Ok(frame) if frame.is_ok() => Ok(conn),
            _ => Err(BackendError::Select {
                db: self.addr.db,
                reply: reply.to_string(),
            }),
        }
    }

    /// Forwards `message` verbatim and returns the backend's reply. Any failure leaves the shard
    /// disconnected; retrying is up to the caller.
    pub async fn execute(&self, message: &Message) -> Result<Message, BackendError> {
        let mut state = self.state.lock().await;

        if !self.status().is_available() {
            return Err(BackendError::Disconnected);
        }
        let Some(conn) = state.conn.as_mut() else {
            return Err(BackendError::Disconnected);
        };

        match round_trip(conn, message).await {
            Ok(reply) => {
                debug!("[shard {}] {} -> {}", self.id, message, reply);
                Ok(reply)
            }
            Err(e) => {
                warn!("[shard {}] Request failed: {}", self.id, e);
                state.conn = None;
                self.set_status(ShardStatus::Disconnected);
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Releases the backend connection. A no-op on a disconnected shard.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.conn.take().is_some() {
            info!("[shard {}] Closed", self.id);
        }
        self.set_status(ShardStatus::Disconnected);
    }
}

async fn round_trip(conn: &mut Connection, message: &Message) -> Result<Message, BackendError> {
    conn.write_message(message).await?;
    conn.read_message()
        .await?
        .ok_or(BackendError::ConnectionClosed)
}
