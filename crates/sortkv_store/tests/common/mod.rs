//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use sortkv_store::{server, CollectionSet, MemCollection, RpcService};
use tokio::net::TcpListener;

/// The four-entry collection used throughout: `[a, b, b, c]`.
pub fn docs() -> MemCollection {
    MemCollection::from_pairs([("a", "va"), ("b", "vb1"), ("b", "vb2"), ("c", "vc")])
}

/// Start an in-process server on an ephemeral port and return its address.
pub async fn start_server(collections: CollectionSet) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let service = RpcService::new(collections, 7);
    tokio::spawn(async move {
        let _ = server::serve(listener, service).await;
    });
    addr
}
