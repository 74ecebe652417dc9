//! Sorted key-value lookup service: collection read primitives, point and
//! prefix lookups, resumable cursor scans, and the TCP RPC server/client
//! that exposes them.

pub mod client;
pub mod collection;
pub mod lookup;
pub mod rpc;
pub mod scan;
pub mod server;
pub mod service;

pub use client::RpcClient;
pub use collection::{CollectionSet, EntryIter, MemCollection, SortedReader};
pub use rpc::LookupService;
pub use service::RpcService;
