use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cluster::Cluster;
use crate::command::{Control, Request};
use crate::config::GroupSpec;
use crate::connection::Connection;
use crate::message::Message;
use crate::transaction::Transaction;
use crate::Error;

/// State shared by every client session, built once at startup.
pub struct Proxy {
    cluster: Arc<Cluster>,
    clients: AtomicUsize,
}

impl Proxy {
    pub fn new(cluster: Arc<Cluster>) -> Proxy {
        Proxy {
            cluster,
            clients: AtomicUsize::new(0),
        }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Number of clients currently connected.
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// Accepts connections forever, one task per client.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), Error> {
        info!("Listening to connections on {}", listener.local_addr()?);

        loop {
            let (socket, client_address) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let proxy = self.clone();
            tokio::spawn(async move {
                let clients = proxy.clients.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    "Got connection from: {}. {} clients connected",
                    client_address, clients
                );

                if let Err(e) = handle_connection(socket, client_address, proxy.clone()).await {
                    error!("Session ended with error: {}", e);
                }

                let clients = proxy.clients.fetch_sub(1, Ordering::Relaxed) - 1;
                info!(
                    "Client disconnected: {}. {} clients connected",
                    client_address, clients
                );
            });
        }
    }
}

/// Binds `addr`, connects the shard groups and serves clients. Failing to bind is the only fatal
/// error, unreachable shards are retried on demand.
pub async fn run(addr: &str, groups: &[GroupSpec]) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("could not bind to address {}: {}", addr, e))?;

    let cluster = Arc::new(Cluster::from_specs(groups)?);
    cluster.start().await;

    Arc::new(Proxy::new(cluster)).serve(listener).await
}

#[instrument(
    name = "connection",
    skip(stream, proxy),
    fields(session_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    proxy: Arc<Proxy>,
) -> Result<(), Error> {
    let mut conn = Connection::client(stream);

    tracing::Span::current()
        .record("session_id", Uuid::new_v4().to_string())
        .record("client_address", client_address.to_string());

    let mut session = Session::new(proxy.cluster.clone());
    let mut requests: u64 = 0;

    while let Some(message) = conn.read_message().await? {
        requests += 1;
        debug!("Received message from client: {}", message);

        let reply = session.handle(Request::from(message)).await;

        debug!("Sending response to client: {}", reply);
        conn.write_message(&reply).await?;

        if session.is_closed() {
            break;
        }
    }

    if let Some(tx) = session.transaction.take() {
        info!("Discarding open transaction of {} commands", tx.len());
    }

    info!("Connection closed after {} requests", requests);
    Ok(())
}

/// Per-client state: whether a transaction is open. Idle while `transaction` is `None`.
pub(crate) struct Session {
    cluster: Arc<Cluster>,
    transaction: Option<Transaction>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(cluster: Arc<Cluster>) -> Session {
        Session {
            cluster,
            transaction: None,
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolves one request into its reply. Routing and backend failures become error replies,
    /// the session stays usable.
    pub(crate) async fn handle(&mut self, request: Request) -> Message {
        match request {
            Request::Control(control) => self.control(control).await,
            Request::Data(message) => self.data(message).await,
        }
    }

    async fn control(&mut self, control: Control) -> Message {
        match control {
            Control::Multi => {
                if self.transaction.is_some() {
                    return Message::error("ERR MULTI calls can not be nested");
                }
                self.transaction = Some(Transaction::new(self.cluster.clone()));
                Message::ok()
            }
            Control::Exec => match self.transaction.take() {
                Some(tx) => tx.execute().await,
                None => Message::error("ERR EXEC without MULTI"),
            },
            Control::Discard => match self.transaction.take() {
                Some(_) => Message::ok(),
                None => Message::error("ERR DISCARD without MULTI"),
            },
            Control::Ping => Message::pong(),
            Control::Quit => {
                self.closed = true;
                Message::ok()
            }
        }
    }

    async fn data(&mut self, message: Message) -> Message {
        let result = match self.transaction.as_mut() {
            Some(tx) => tx.send(message),
            None => self.cluster.execute(&message).await,
        };

        result.unwrap_or_else(|e| {
            warn!("Error getting response: {}", e);
            Message::error(e)
        })
    }
}
