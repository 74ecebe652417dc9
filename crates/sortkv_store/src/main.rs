// Lookup server binary: loads collection files and serves them over TCP.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sortkv_store::collection::{load_collection_file, SortedReader};
use sortkv_store::{server, CollectionSet, RpcService};

/// CLI options for the lookup server.
#[derive(Parser, Debug)]
#[command(name = "sortkv-serve")]
struct Args {
    /// Address to accept RPC connections on.
    #[arg(long, default_value = "127.0.0.1:9999")]
    listen: SocketAddr,

    /// Collection to serve, as `name=path`. Repeat for several collections.
    #[arg(long = "collection", required = true)]
    collections: Vec<String>,

    /// Seed for GetInfo key sampling (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut collections = CollectionSet::new();
    for spec in &args.collections {
        let (name, path) = parse_collection_arg(spec)?;
        let reader = load_collection_file(&path)
            .with_context(|| format!("load collection {name:?}"))?;
        tracing::info!(collection = %name, entries = reader.len(), path = %path.display(), "loaded collection");
        collections.insert(name, Arc::new(reader));
    }

    let seed = if args.seed == 0 {
        rand::random()
    } else {
        args.seed
    };
    server::run(args.listen, RpcService::new(collections, seed)).await
}

/// Parse `name=path`.
fn parse_collection_arg(spec: &str) -> anyhow::Result<(String, PathBuf)> {
    let (name, path) = spec
        .split_once('=')
        .with_context(|| format!("invalid collection {spec:?} (expected name=path)"))?;
    anyhow::ensure!(!name.trim().is_empty(), "collection name must not be empty in {spec:?}");
    Ok((name.trim().to_string(), PathBuf::from(path.trim())))
}
