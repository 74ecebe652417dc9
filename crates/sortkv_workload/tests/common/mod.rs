//! Shared helpers for harness integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use sortkv_store::{server, CollectionSet, MemCollection, RpcService};
use sortkv_workload::Recorder;
use tokio::net::TcpListener;

pub fn collection(pairs: &[(&str, &str)]) -> CollectionSet {
    CollectionSet::new().with_collection("docs", MemCollection::from_pairs(pairs.iter().copied()))
}

/// Start an in-process lookup server on an ephemeral port.
pub async fn start_server(collections: CollectionSet) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server::serve(listener, RpcService::new(collections, 11)).await;
    });
    addr
}

/// An address nothing is listening on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr")
}

pub fn timer_count(recorder: &Recorder, name: &str) -> u64 {
    recorder.snapshot().timers.get(name).map(|t| t.count).unwrap_or(0)
}

pub fn counter(recorder: &Recorder, name: &str) -> u64 {
    recorder.snapshot().counters.get(name).copied().unwrap_or(0)
}

/// Poll until `name` has recorded at least `count` samples or 10s pass.
pub async fn wait_for_timer(recorder: &Recorder, name: &str, count: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while timer_count(recorder, name) < count && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
