use futures::future::join_all;
use thiserror::Error as ThisError;
use tracing::{info, warn};

use crate::cluster::shard::Shard;
use crate::message::Message;

#[derive(Debug, ThisError, PartialEq)]
#[error("all shards are down")]
pub struct AllShardsDown;

/// Redundant shards serving one partition, in priority order: the first member is the primary,
/// the rest are replicas tried in turn when it fails.
#[derive(Default)]
pub struct ShardGroup {
    shards: Vec<Shard>,
}

impl ShardGroup {
    pub fn new() -> ShardGroup {
        ShardGroup { shards: Vec::new() }
    }

    /// Adds a member. Only possible while the group is being built, a started group is shared
    /// behind the cluster and can no longer be borrowed mutably.
    pub fn add_shard(&mut self, shard: Shard) {
        self.shards.push(shard);
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Connects every member. Members that fail stay disconnected and are retried on demand.
    /// Returns how many members are connected.
    pub async fn start(&self) -> usize {
        let statuses = join_all(self.shards.iter().map(Shard::connect)).await;
        let connected = statuses.iter().filter(|status| status.is_available()).count();

        if connected == 0 {
            warn!("Shard group started with no connected shards");
        } else {
            info!(
                "Shard group started with {}/{} shards connected",
                connected,
                self.shards.len()
            );
        }

        connected
    }

    /// Runs `message` on the first connected member. When that fails the following members are
    /// tried in order, wrapping around, reconnecting each disconnected one once before using it.
    /// Every member is tried at most once per call.
    pub async fn execute(&self, message: &Message) -> Result<Message, AllShardsDown> {
        let first = self
            .shards
            .iter()
            .position(|shard| shard.status().is_available())
            .unwrap_or(0);

        let (tail, head) = self.shards.split_at(first);
        for shard in head.iter().chain(tail) {
            if !shard.status().is_available() && !shard.reconnect_if_down().await.is_available() {
                continue;
            }

            match shard.execute(message).await {
                Ok(reply) => return Ok(reply),
                Err(e) => warn!("[shard {}] Failing over: {}", shard.id(), e),
            }
        }

        Err(AllShardsDown)
    }

    pub async fn close(&self) {
        join_all(self.shards.iter().map(Shard::close)).await;
    }
}
