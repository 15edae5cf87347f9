//! Key routing across shard groups.
//!
//! The group of a key is `siphash13(key) % groups`. There is no hash ring: changing the number of
//! groups remaps existing keys, so resizing the cluster is an offline operation.

use std::hash::Hasher;

use futures::future::join_all;
use siphasher::sip::SipHasher13;
use tracing::{debug, info};

use crate::cluster::group::ShardGroup;
use crate::cluster::shard::Shard;
use crate::cluster::Error;
use crate::config::GroupSpec;
use crate::message::Message;

/// The fixed, ordered list of shard groups. Immutable once built, so routing lookups need no
/// synchronization.
pub struct Cluster {
    groups: Vec<ShardGroup>,
}

impl Cluster {
    pub fn new(groups: Vec<ShardGroup>) -> Result<Cluster, Error> {
        if groups.is_empty() {
            return Err(Error::NoGroups);
        }
        Ok(Cluster { groups })
    }

    /// Builds the shards and groups described by `specs`, without connecting them.
    pub fn from_specs(specs: &[GroupSpec]) -> Result<Cluster, Error> {
        let groups = specs
            .iter()
            .map(|spec| {
                let mut group = ShardGroup::new();
                for addr in &spec.shards {
                    let shard = Shard::new(addr.clone());
                    info!("[{}] Added shard: {}", shard.id(), addr);
                    group.add_shard(shard);
                }
                group
            })
            .collect();

        Cluster::new(groups)
    }

    /// Connects every group.
    pub async fn start(&self) {
        join_all(self.groups.iter().map(ShardGroup::start)).await;
        info!("Started redis cluster with {} shard groups", self.groups.len());
    }

    pub fn groups(&self) -> &[ShardGroup] {
        &self.groups
    }

    /// Index of the group that owns `key`.
    pub fn route(&self, key: &[u8]) -> usize {
        slot(key, self.groups.len())
    }

    /// Index of the group a command must go to. Commands without a key in the routing position
    /// (e.g. admin or keyless commands) are rejected rather than guessed.
    pub fn route_message(&self, message: &Message) -> Result<usize, Error> {
        if !message.has_routing_key() {
            return Err(Error::NoRoutingKey {
                command: message.command_name(),
            });
        }
        Ok(self.route(message.routing_key()))
    }

    /// Routes `message` by its key and executes it on the owning group.
    pub async fn execute(&self, message: &Message) -> Result<Message, Error> {
        let group = self.route_message(message)?;
        debug!("Routing {} to group {}", message.command_name(), group);
        self.execute_on(group, message).await
    }

    /// Executes `message` on an already resolved group.
    pub async fn execute_on(&self, group: usize, message: &Message) -> Result<Message, Error> {
        self.groups[group]
            .execute(message)
            .await
            .map_err(|_| Error::AllShardsDown { group })
    }

    pub async fn close(&self) {
        join_all(self.groups.iter().map(ShardGroup::close)).await;
    }
}

fn slot(key: &[u8], groups: usize) -> usize {
    let mut hasher = SipHasher13::new();
    hasher.write(key);
    (hasher.finish() % groups as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardAddr;

    fn cluster(groups: usize) -> Cluster {
        let specs: Vec<GroupSpec> = (0..groups)
            .map(|i| GroupSpec {
                shards: vec![ShardAddr::new("127.0.0.1", 7000 + i as u16, 0)],
            })
            .collect();
        Cluster::from_specs(&specs).unwrap()
    }

    #[test]
    fn routing_is_deterministic() {
        let a = cluster(4);
        let b = cluster(4);

        for i in 0..100 {
            let key = format!("key_{}", i);
            assert_eq!(a.route(key.as_bytes()), a.route(key.as_bytes()));
            assert_eq!(a.route(key.as_bytes()), b.route(key.as_bytes()));
        }
    }

    #[test]
    fn routing_distribution() {
        let cluster = cluster(4);
        let mut counts = [0; 4];

        for i in 0..1000 {
            counts[cluster.route(format!("key_{}", i).as_bytes())] += 1;
        }

        for count in counts {
            assert!(count > 150 && count < 350, "Uneven distribution: {}", count);
        }
    }

    #[test]
    fn single_group_takes_every_key() {
        let cluster = cluster(1);

        assert_eq!(cluster.route(b"anything"), 0);
        assert_eq!(cluster.route(b""), 0);
    }

    #[test]
    fn route_message_without_key() {
        let cluster = cluster(2);
        let message = Message::parse(b"+OK\r\n").unwrap();

        assert_eq!(
            cluster.route_message(&message),
            Err(Error::NoRoutingKey {
                command: String::new()
            })
        );

        let message = Message::parse(b"DBSIZE").unwrap();
        assert_eq!(
            cluster.route_message(&message),
            Err(Error::NoRoutingKey {
                command: "DBSIZE".into()
            })
        );
    }

    #[test]
    fn route_message_uses_first_argument() {
        let cluster = cluster(8);
        let message = Message::parse(b"SET foo bar").unwrap();

        assert_eq!(cluster.route_message(&message), Ok(cluster.route(b"foo")));
    }

    #[test]
    fn empty_cluster_is_rejected() {
        assert!(matches!(Cluster::new(Vec::new()), Err(Error::NoGroups)));
    }

    #[tokio::test]
    async fn keyless_command_is_not_executed() {
        let cluster = cluster(2);
        let message = Message::parse(b"+PING\r\n").unwrap();

        assert!(matches!(
            cluster.execute(&message).await,
            Err(Error::NoRoutingKey { .. })
        ));
    }
}
