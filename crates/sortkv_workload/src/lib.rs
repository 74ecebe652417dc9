//! Differential load harness for sorted key-value lookup servers.
//!
//! A [`dispatch::Dispatcher`] ticks at the target rate and feeds a bounded
//! queue; a [`worker::WorkerPool`] drains it, builds lookups from the
//! [`sampler::KeySampler`], sends them to a primary and optional shadow
//! server, and hands both answers to the [`diff::ResponseDiffer`].

pub mod diff;
pub mod dispatch;
pub mod endpoint;
pub mod metrics;
pub mod request;
pub mod sampler;
pub mod worker;

pub use diff::{DiffResult, ResponseDiffer};
pub use dispatch::{Dispatcher, LoadShedder, TickLimiter, WorkQueue};
pub use endpoint::Endpoint;
pub use metrics::Recorder;
pub use request::{LookupKind, LookupRequest, LookupResponse, RequestMix};
pub use sampler::{KeySample, KeySampler};
pub use worker::{Connect, TcpConnector, WorkerContext, WorkerPool};
