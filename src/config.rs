use std::fmt;
use std::str::FromStr;

use thiserror::Error as ThisError;
use xxhash_rust::xxh64::xxh64;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("invalid shard format, must be in host:port:db form: {0}")]
    InvalidShard(String),
    #[error("could not parse port for shard: {0}")]
    InvalidPort(String),
    #[error("could not parse db for shard: {0}")]
    InvalidDb(String),
    #[error("shard group has no shards")]
    EmptyGroup,
}

/// Address of one backend: `host:port:db`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardAddr {
    pub host: String,
    pub port: u16,
    pub db: u32,
}

impl ShardAddr {
    pub fn new(host: impl Into<String>, port: u16, db: u32) -> ShardAddr {
        ShardAddr {
            host: host.into(),
            port,
            db,
        }
    }

    /// Stable identity of the shard, derived from its address so that restarts keep the same
    /// id. Only used to tell shards apart in logs, routing never looks at it.
    pub fn id(&self) -> u64 {
        xxh64(self.to_string().as_bytes(), 0)
    }
}

impl fmt::Display for ShardAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.db)
    }
}

impl FromStr for ShardAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split(':').collect();

        let [host, port, db] = parts[..] else {
            return Err(Error::InvalidShard(s.to_string()));
        };
        if host.is_empty() {
            return Err(Error::InvalidShard(s.to_string()));
        }

        let port = port
            .parse()
            .map_err(|_| Error::InvalidPort(s.to_string()))?;
        let db = db.parse().map_err(|_| Error::InvalidDb(s.to_string()))?;

        Ok(ShardAddr::new(host, port, db))
    }
}

/// The redundant shards that serve one partition, in priority order.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupSpec {
    pub shards: Vec<ShardAddr>,
}

impl FromStr for GroupSpec {
    type Err = Error;

    /// Parses a comma separated list of `host:port:db` triples.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let shards = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(ShardAddr::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        if shards.is_empty() {
            return Err(Error::EmptyGroup);
        }

        Ok(GroupSpec { shards })
    }
}

/// Parses one or more group specifications separated by `;`.
pub fn parse_groups(s: &str) -> Result<Vec<GroupSpec>, Error> {
    s.split(';')
        .filter(|group| !group.trim().is_empty())
        .map(GroupSpec::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_shard_addr() {
        let addr: ShardAddr = "localhost:6379:2".parse().unwrap();

        assert_eq!(addr, ShardAddr::new("localhost", 6379, 2));
        assert_eq!(addr.to_string(), "localhost:6379:2");
    }

    #[test]
    fn parse_shard_addr_errors() {
        assert_eq!(
            "localhost:6379".parse::<ShardAddr>(),
            Err(Error::InvalidShard("localhost:6379".into()))
        );
        assert_eq!(
            "localhost:port:0".parse::<ShardAddr>(),
            Err(Error::InvalidPort("localhost:port:0".into()))
        );
        assert_eq!(
            "localhost:6379:-1".parse::<ShardAddr>(),
            Err(Error::InvalidDb("localhost:6379:-1".into()))
        );
        assert!(":6379:0".parse::<ShardAddr>().is_err());
    }

    #[test]
    fn parse_group_list() {
        let groups = parse_groups("a:6379:0,b:6380:0;c:6381:1").unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[0].shards,
            vec![ShardAddr::new("a", 6379, 0), ShardAddr::new("b", 6380, 0)]
        );
        assert_eq!(groups[1].shards, vec![ShardAddr::new("c", 6381, 1)]);
    }

    #[test]
    fn parse_empty_group() {
        assert_eq!(" , ".parse::<GroupSpec>(), Err(Error::EmptyGroup));
    }

    #[test]
    fn shard_id_is_stable() {
        let a = ShardAddr::new("localhost", 6379, 0);
        let b: ShardAddr = "localhost:6379:0".parse().unwrap();

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), ShardAddr::new("localhost", 6379, 1).id());
    }
}
