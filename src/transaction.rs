use std::sync::Arc;

use futures::future::join_all;
use itertools::Itertools;
use tracing::{debug, warn};

use crate::cluster::{self, Cluster};
use crate::message::Message;

struct Entry {
    message: Message,
    group: usize,
}

/// The commands a client queued between `MULTI` and `EXEC`, together with the group each one
/// routes to.
///
/// Nothing is sent to a backend until `execute`. The commands are not atomic across groups: a
/// group that is down only fails its own entries.
pub struct Transaction {
    cluster: Arc<Cluster>,
    entries: Vec<Entry>,
}

impl Transaction {
    pub fn new(cluster: Arc<Cluster>) -> Transaction {
        Transaction {
            cluster,
            entries: Vec::new(),
        }
    }

    /// Queues `message` and returns the `QUEUED` acknowledgement. A command without a routing key
    /// is refused and not queued.
    pub fn send(&mut self, message: Message) -> Result<Message, cluster::Error> {
        let group = self.cluster.route_message(&message)?;
        self.entries.push(Entry { message, group });
        Ok(Message::queued())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every queued command and returns one array reply in submission order.
    ///
    /// Commands are partitioned by group. Groups run concurrently, commands within a group run
    /// one by one in their original order.
    pub async fn execute(self) -> Message {
        let Transaction { cluster, entries } = self;
        let total = entries.len();

        let batches = entries
            .into_iter()
            .enumerate()
            .into_group_map_by(|(_, entry)| entry.group);

        debug!(
            "Executing transaction of {} commands over {} groups",
            total,
            batches.len()
        );

        let cluster = &cluster;
        let replies = join_all(batches.into_iter().map(|(group, batch)| async move {
            let mut replies = Vec::with_capacity(batch.len());
            for (position, entry) in batch {
                let reply = match cluster.execute_on(group, &entry.message).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("Transaction command {} failed: {}", position, e);
                        Message::error(e)
                    }
                };
                replies.push((position, reply));
            }
            replies
        }))
        .await;

        let replies = replies
            .into_iter()
            .flatten()
            .sorted_unstable_by_key(|(position, _)| *position)
            .map(|(_, reply)| reply)
            .collect::<Vec<_>>();

        Message::array(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupSpec, ShardAddr};

    fn cluster() -> Arc<Cluster> {
        let specs = vec![
            GroupSpec {
                shards: vec![ShardAddr::new("127.0.0.1", 1, 0)],
            },
            GroupSpec {
                shards: vec![ShardAddr::new("127.0.0.1", 2, 0)],
            },
        ];
        Arc::new(Cluster::from_specs(&specs).unwrap())
    }

    #[test]
    fn send_queues_and_acknowledges() {
        let mut tx = Transaction::new(cluster());

        let reply = tx.send(Message::parse(b"SET foo bar").unwrap()).unwrap();

        assert_eq!(reply, Message::queued());
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn send_refuses_keyless_command() {
        let mut tx = Transaction::new(cluster());

        let result = tx.send(Message::parse(b"DBSIZE").unwrap());

        assert!(matches!(result, Err(cluster::Error::NoRoutingKey { .. })));
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn empty_transaction_returns_empty_array() {
        let tx = Transaction::new(cluster());

        assert_eq!(tx.execute().await.serialize(), "*0\r\n".as_bytes());
    }
}
