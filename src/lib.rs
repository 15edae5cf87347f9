pub mod cluster;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod frame;
pub mod message;
pub mod server;
pub mod transaction;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
