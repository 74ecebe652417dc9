//! Load generator for sorted key-value lookup servers.
//!
//! Sends randomized single/multi lookups at a fixed rate to one server and,
//! when `--diff` is given, mirrors each request to a shadow and compares the
//! answers.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use sortkv_store::rpc::InfoRequest;
use sortkv_store::{LookupService, RpcClient};
use sortkv_workload::{
    Dispatcher, Endpoint, KeySampler, LoadShedder, Recorder, RequestMix, TcpConnector, TickLimiter,
    WorkQueue, WorkerContext, WorkerPool,
};

/// CLI options for the load harness.
#[derive(Parser, Debug, Clone)]
#[command(name = "sortkv-load")]
struct Args {
    /// Target server, `host:port` or `name=host:port` to label its metrics.
    #[arg(long, default_value = "localhost:9999")]
    server: String,

    /// Shadow server that receives every request for comparison.
    #[arg(long)]
    diff: Option<String>,

    /// Collection to query.
    #[arg(long)]
    collection: Option<String>,

    /// Number of concurrent workers (each owns its connections).
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Target requests per second.
    #[arg(long, default_value_t = 100)]
    qps: u32,

    /// Number of random keys fetched from the server to draw requests from.
    #[arg(long, default_value_t = 1000)]
    sample_size: u32,

    /// Percent of requests that are multi-value lookups (rest are single).
    #[arg(long, default_value_t = 50)]
    multi_pct: u8,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// How often to fetch a fresh key sample.
    #[arg(long, default_value = "1m")]
    key_refresh: humantime::Duration,

    /// How often to log a metrics snapshot.
    #[arg(long, default_value = "10s")]
    report_every: humantime::Duration,

    /// Graphite plaintext endpoint (`host:port`) to push metrics to.
    #[arg(long)]
    graphite: Option<String>,

    /// Prefix for metrics pushed to Graphite.
    #[arg(long, default_value = "sortkv.load")]
    graphite_prefix: String,
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

    run(Args::parse()).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    anyhow::ensure!(args.workers > 0, "--workers must be > 0");
    anyhow::ensure!(args.qps > 0, "--qps must be > 0");
    anyhow::ensure!(args.sample_size > 0, "--sample-size must be > 0");
    let mix = RequestMix::new(args.multi_pct)?;
    let key_refresh: Duration = args.key_refresh.into();
    let report_every: Duration = args.report_every.into();
    anyhow::ensure!(!key_refresh.is_zero(), "--key-refresh must be > 0");
    anyhow::ensure!(!report_every.is_zero(), "--report-every must be > 0");

    let primary = Endpoint::parse(&args.server)?;
    let shadow = args.diff.as_deref().map(Endpoint::parse).transpose()?;
    let info = Arc::new(RpcClient::new(primary.addr.clone()));

    let Some(collection) = args.collection.clone() else {
        eprintln!("--collection is required");
        print_collections(info.as_ref(), &primary).await;
        std::process::exit(1);
    };

    let sampler = Arc::new(KeySampler::new(collection, args.sample_size));
    let keys = match sampler.refresh(info.as_ref()).await {
        Ok(keys) => keys,
        Err(err) => {
            eprintln!("Failed to fetch testing keys: {err:#}");
            std::process::exit(1);
        }
    };
    println!(
        "Sending {}qps to {}, drawing from {} random keys...",
        args.qps, primary.addr, keys
    );

    // Use a random seed when the user provides zero.
    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };

    let recorder = Recorder::new();
    recorder.spawn_console_logger(report_every);
    if let Some(target) = args.graphite.clone() {
        recorder.spawn_graphite_reporter(target, args.graphite_prefix.clone(), report_every);
    }
    sampler.clone().spawn_refresher(info, key_refresh);

    let queue = WorkQueue::for_rate(args.qps, args.workers)?;
    let ctx = Arc::new(WorkerContext::new(
        &recorder,
        sampler,
        primary,
        shadow,
        mix,
    ));
    let _pool = WorkerPool::start(&TcpConnector, ctx, args.workers, seed, &queue).await?;

    let dispatcher = Dispatcher::new(
        TickLimiter::new(args.qps)?,
        LoadShedder::new(queue, recorder.counter("dropped"), recorder.gauge("queue")),
    );
    dispatcher.run().await;
    Ok(())
}

async fn print_collections(info: &RpcClient, endpoint: &Endpoint) {
    match info.get_info(&InfoRequest::default()).await {
        Ok(collections) => {
            eprintln!("Available collections on {}:", endpoint.addr);
            for c in collections {
                eprintln!("  {} ({} entries)", c.name, c.entry_count);
            }
        }
        Err(err) => eprintln!("Could not list collections on {}: {err:#}", endpoint.addr),
    }
}
