pub mod group;
pub mod router;
pub mod shard;

use thiserror::Error as ThisError;

pub use group::{AllShardsDown, ShardGroup};
pub use router::Cluster;
pub use shard::{BackendError, Shard, ShardStatus};

/// Failures above the shard group boundary. All of them are reported to the client as an error
/// reply, none of them ends the session.
#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("ERR command '{command}' has no routing key")]
    NoRoutingKey { command: String },
    #[error("ERR all shards are down for group {group}")]
    AllShardsDown { group: usize },
    #[error("cluster has no shard groups")]
    NoGroups,
}
