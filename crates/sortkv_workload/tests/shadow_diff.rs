//! Full harness runs against real TCP lookup servers.

mod common;

use std::sync::Arc;

use sortkv_store::collection::{load_collection_file, write_collection_file};
use sortkv_store::{CollectionSet, MemCollection, RpcClient};
use sortkv_workload::{
    Dispatcher, Endpoint, KeySampler, LoadShedder, Recorder, RequestMix, TcpConnector, TickLimiter,
    WorkQueue, WorkerContext, WorkerPool,
};

use common::{collection, counter, dead_addr, start_server, timer_count, wait_for_timer};

const DATA: &[(&str, &str)] = &[("a", "1"), ("b", "2"), ("b", "3"), ("c", "4"), ("d", "5")];

struct Run {
    recorder: Arc<Recorder>,
    pool: WorkerPool,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl Run {
    /// Stop producing and let in-flight workers settle before reading.
    async fn stop(self) -> Arc<Recorder> {
        self.dispatcher.abort();
        self.pool.abort();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        self.recorder
    }
}

async fn start(primary: Endpoint, shadow: Option<Endpoint>, mix: RequestMix) -> Run {
    let recorder = Recorder::new();
    let sampler = Arc::new(KeySampler::new("docs", 100));
    let info = RpcClient::new(primary.addr.clone());
    sampler.refresh(&info).await.expect("initial key fetch");

    let queue = WorkQueue::new(64).expect("queue");
    let ctx = Arc::new(WorkerContext::new(&recorder, sampler, primary, shadow, mix));
    let pool = WorkerPool::start(&TcpConnector, ctx, 3, 1234, &queue)
        .await
        .expect("pool");
    let dispatcher = Dispatcher::new(
        TickLimiter::new(500).expect("limiter"),
        LoadShedder::new(queue, recorder.counter("dropped"), recorder.gauge("queue")),
    );
    Run {
        recorder,
        pool,
        dispatcher: tokio::spawn(dispatcher.run()),
    }
}

fn endpoint(name: &str, addr: std::net::SocketAddr) -> Endpoint {
    Endpoint::parse(&format!("{name}={addr}")).expect("endpoint")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn matching_servers_produce_no_diffs() {
    let prod = start_server(collection(DATA)).await;
    let canary = start_server(collection(DATA)).await;
    let run = start(endpoint("prod", prod), Some(endpoint("canary", canary)), RequestMix::default()).await;

    wait_for_timer(&run.recorder, "rtt.canary.overall", 50).await;
    let recorder = run.stop().await;

    assert!(timer_count(&recorder, "rtt.prod.overall") >= 50);
    assert!(timer_count(&recorder, "rtt.canary.overall") >= 50);
    assert_eq!(counter(&recorder, "diffs.getValuesSingle"), 0);
    assert_eq!(counter(&recorder, "diffs.getValuesMulti"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn divergent_shadow_is_reported() {
    let prod = start_server(collection(DATA)).await;
    // Same keys, every value changed.
    let canary = start_server(collection(&[
        ("a", "x"),
        ("b", "y"),
        ("b", "z"),
        ("c", "w"),
        ("d", "v"),
    ]))
    .await;
    let run = start(
        endpoint("prod", prod),
        Some(endpoint("canary", canary)),
        RequestMix::new(100).expect("mix"),
    )
    .await;

    wait_for_timer(&run.recorder, "rtt.canary.overall", 30).await;
    let recorder = run.stop().await;

    let shadow_calls = timer_count(&recorder, "rtt.canary.getValuesMulti");
    assert!(shadow_calls >= 30);
    // Every completed comparison mismatched.
    assert_eq!(counter(&recorder, "diffs.getValuesMulti"), shadow_calls);
    assert_eq!(counter(&recorder, "diffs.getValuesSingle"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_shadow_keeps_primary_running() {
    let prod = start_server(collection(DATA)).await;
    let canary = dead_addr().await;
    let run = start(endpoint("prod", prod), Some(endpoint("canary", canary)), RequestMix::default()).await;

    wait_for_timer(&run.recorder, "rtt.prod.overall", 30).await;
    let recorder = run.stop().await;

    assert!(timer_count(&recorder, "rtt.prod.overall") >= 30);
    // Failed calls are timed too.
    assert!(timer_count(&recorder, "rtt.canary.overall") >= 25);
    assert_eq!(counter(&recorder, "diffs.getValuesSingle"), 0);
    assert_eq!(counter(&recorder, "diffs.getValuesMulti"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn primary_only_run_reads_collection_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("docs.skv");
    write_collection_file(&path, &MemCollection::from_pairs(DATA.iter().copied())).expect("write");
    let docs = load_collection_file(&path).expect("load");
    let prod = start_server(CollectionSet::new().with_collection("docs", docs)).await;

    let run = start(Endpoint::parse(&prod.to_string()).expect("endpoint"), None, RequestMix::default()).await;
    wait_for_timer(&run.recorder, "rtt.overall", 40).await;
    let recorder = run.stop().await;

    assert!(timer_count(&recorder, "rtt.overall") >= 40);
    assert_eq!(
        timer_count(&recorder, "rtt.getValuesSingle") + timer_count(&recorder, "rtt.getValuesMulti"),
        timer_count(&recorder, "rtt.overall")
    );
}

#[tokio::test]
async fn initial_key_fetch_fails_for_unknown_collection() {
    let prod = start_server(collection(DATA)).await;
    let sampler = KeySampler::new("missing", 10);
    let err = sampler
        .refresh(&RpcClient::new(prod.to_string()))
        .await
        .expect_err("unknown collection");
    assert!(format!("{err:#}").contains("unknown collection"));
}
