use clap::Parser;
use shardis::config::{self, GroupSpec};
use shardis::{server, Error};

const NET_ADDRESS: &str = "0.0.0.0:6543";

#[derive(Parser, Debug)]
struct Args {
    /// Net address that the proxy will listen on
    #[arg(long, env = "SHARDIS_NET_ADDRESS", default_value = NET_ADDRESS)]
    net_address: String,

    /// List of redis shards (host:port:db, comma separated) that form one redundant shard group.
    /// May be given multiple times, or separated by `;`, to specify multiple shard groups
    #[arg(long = "redis-group", env = "SHARDIS_REDIS_GROUP", required = true)]
    redis_groups: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let mut groups: Vec<GroupSpec> = Vec::new();
    for arg in &args.redis_groups {
        groups.extend(config::parse_groups(arg)?);
    }

    server::run(&args.net_address, &groups).await
}
