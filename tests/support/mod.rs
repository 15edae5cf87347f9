#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shardis::config::ShardAddr;
use shardis::connection::Connection;
use shardis::message::Message;
use tokio::net::{TcpListener, TcpStream};

/// How a fake backend answers.
#[derive(Clone, Copy, Debug)]
pub enum Backend {
    /// Accepts `SELECT` and answers every other command with `<name>:<COMMAND>:<key>`.
    Echo(&'static str),
    /// Accepts `SELECT`, then drops the connection on the next command.
    DropAfterSelect,
    /// Refuses `SELECT`.
    RejectSelect,
    /// Accepts the connection and never answers anything.
    Silent,
}

/// What a fake backend has seen so far.
#[derive(Debug, Default)]
pub struct Counters {
    connections: AtomicUsize,
    commands: AtomicUsize,
}

impl Counters {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Commands received other than `SELECT`.
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }
}

pub async fn spawn_backend(backend: Backend) -> SocketAddr {
    spawn_counted_backend(backend).await.0
}

pub async fn spawn_counted_backend(backend: Backend) -> (SocketAddr, Arc<Counters>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counters = Arc::new(Counters::default());

    let shared = counters.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            shared.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(socket, backend, shared.clone()));
        }
    });

    (addr, counters)
}

async fn serve(socket: TcpStream, backend: Backend, counters: Arc<Counters>) {
    let mut conn = Connection::client(socket);

    while let Ok(Some(request)) = conn.read_message().await {
        let command = request.command_name();
        if command != "SELECT" {
            counters.commands.fetch_add(1, Ordering::SeqCst);
        }

        let reply = match (command.as_str(), backend) {
            (_, Backend::Silent) => continue,
            ("SELECT", Backend::RejectSelect) => Message::error("ERR DB index is out of range"),
            ("SELECT", _) => Message::ok(),
            (_, Backend::Echo(name)) => echo(name, &command, request.routing_key()),
            (_, Backend::DropAfterSelect) | (_, Backend::RejectSelect) => return,
        };

        if conn.write_message(&reply).await.is_err() {
            return;
        }
    }
}

/// The reply an `Echo` backend called `name` gives to `command key ...`.
pub fn echo(name: &str, command: &str, key: &[u8]) -> Message {
    Message::bulk(format!(
        "{}:{}:{}",
        name,
        command,
        String::from_utf8_lossy(key)
    ))
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn shard_addr(addr: SocketAddr) -> ShardAddr {
    ShardAddr::new(addr.ip().to_string(), addr.port(), 0)
}
