use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use sortkv_store::rpc::KeyRequest;
use sortkv_store::{LookupService, RpcClient};
use tokio::task::JoinHandle;

use crate::diff::{DiffResult, ResponseDiffer};
use crate::dispatch::WorkQueue;
use crate::endpoint::{Endpoint, MetricNames};
use crate::metrics::{Recorder, Timer};
use crate::request::{key_count, LookupKind, LookupRequest, LookupResponse, RequestMix};
use crate::sampler::KeySampler;

/// Opens a worker-owned client for an endpoint.
#[async_trait]
pub trait Connect: Send + Sync {
    type Client: LookupService + 'static;

    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<Self::Client>;
}

/// Connects over TCP. The socket is opened on the first request.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connect for TcpConnector {
    type Client = RpcClient;

    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<RpcClient> {
        Ok(RpcClient::new(endpoint.addr.clone()))
    }
}

/// Latency series for one target: overall plus one per lookup kind.
#[derive(Clone, Debug)]
pub struct Series {
    overall: Timer,
    single: Timer,
    multi: Timer,
}

impl Series {
    pub fn new(recorder: &Recorder, prefix: &str) -> Self {
        Self {
            overall: recorder.timer(&format!("{prefix}.overall")),
            single: recorder.timer(&format!("{prefix}.{}", LookupKind::Single.metric_name())),
            multi: recorder.timer(&format!("{prefix}.{}", LookupKind::Multi.metric_name())),
        }
    }

    fn record(&self, kind: LookupKind, elapsed: Duration) {
        self.overall.record(elapsed);
        match kind {
            LookupKind::Single => self.single.record(elapsed),
            LookupKind::Multi => self.multi.record(elapsed),
        }
    }
}

/// State shared by every worker in a pool.
#[derive(Debug)]
pub struct WorkerContext {
    pub collection: String,
    pub primary: Endpoint,
    pub shadow: Option<Endpoint>,
    pub sampler: Arc<KeySampler>,
    pub mix: RequestMix,
    pub differ: ResponseDiffer,
    pub primary_series: Series,
    pub shadow_series: Option<Series>,
}

impl WorkerContext {
    pub fn new(
        recorder: &Recorder,
        sampler: Arc<KeySampler>,
        primary: Endpoint,
        shadow: Option<Endpoint>,
        mix: RequestMix,
    ) -> Self {
        let names = MetricNames::new(&primary, shadow.as_ref());
        Self {
            collection: sampler.collection().to_string(),
            primary_series: Series::new(recorder, &names.primary),
            shadow_series: names.shadow.as_deref().map(|p| Series::new(recorder, p)),
            differ: ResponseDiffer::new(recorder),
            primary,
            shadow,
            sampler,
            mix,
        }
    }
}

/// Mix the base seed with the worker id for a deterministic per-worker RNG.
pub fn worker_seed(seed: u64, id: usize) -> u64 {
    seed ^ (id as u64).wrapping_mul(0x9e3779b97f4a7c15)
}

pub struct Worker<C> {
    id: usize,
    primary: C,
    shadow: Option<C>,
    ctx: Arc<WorkerContext>,
    rng: SmallRng,
}

impl<C: LookupService> Worker<C> {
    pub fn new(id: usize, primary: C, shadow: Option<C>, ctx: Arc<WorkerContext>, seed: u64) -> Self {
        Self {
            id,
            primary,
            shadow,
            ctx,
            rng: SmallRng::seed_from_u64(worker_seed(seed, id)),
        }
    }

    /// Serve tokens as they arrive.
    pub async fn run(mut self, queue: WorkQueue) {
        while queue.take().await.is_some() {
            self.send_one().await;
        }
        tracing::debug!(worker = self.id, "work queue closed");
    }

    /// Build one request and issue it to the primary, then the shadow.
    /// Returns the diff outcome when both calls succeeded.
    pub async fn send_one(&mut self) -> Option<DiffResult> {
        let req = match self.build_request() {
            Ok(req) => req,
            Err(err) => {
                tracing::warn!(worker = self.id, error = ?err, "could not build request");
                return None;
            }
        };

        let primary = timed(&self.primary, &req, &self.ctx.primary_series).await;
        let primary = log_failure(self.id, &self.ctx.primary, primary);

        let (Some(shadow), Some(series)) = (&self.shadow, &self.ctx.shadow_series) else {
            return None;
        };
        let shadow_endpoint = self.ctx.shadow.as_ref().unwrap_or(&self.ctx.primary);
        let shadow = timed(shadow, &req, series).await;
        let shadow = log_failure(self.id, shadow_endpoint, shadow);

        match (primary, shadow) {
            (Some(primary), Some(shadow)) => Some(self.ctx.differ.compare(&req, &primary, &shadow)),
            _ => None,
        }
    }

    fn build_request(&mut self) -> anyhow::Result<LookupRequest> {
        let kind = self.ctx.mix.pick(&mut self.rng);
        let count = key_count(&mut self.rng);
        let sorted_keys = self.ctx.sampler.sample(count, &mut self.rng)?;
        Ok(LookupRequest {
            kind,
            body: KeyRequest {
                collection: self.ctx.collection.clone(),
                sorted_keys,
            },
        })
    }
}

// Latency is recorded whether or not the call succeeded.
async fn timed<C: LookupService>(
    target: &C,
    req: &LookupRequest,
    series: &Series,
) -> anyhow::Result<LookupResponse> {
    let start = Instant::now();
    let result = req.send(target).await;
    series.record(req.kind, start.elapsed());
    result
}

fn log_failure(
    worker: usize,
    endpoint: &Endpoint,
    result: anyhow::Result<LookupResponse>,
) -> Option<LookupResponse> {
    match result {
        Ok(resp) => Some(resp),
        Err(err) => {
            tracing::warn!(worker, target = %endpoint.name, error = ?err, "lookup failed");
            None
        }
    }
}

/// Fixed set of workers draining one queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Connect each worker's own clients and start it on the runtime.
    pub async fn start<C: Connect>(
        connector: &C,
        ctx: Arc<WorkerContext>,
        workers: usize,
        seed: u64,
        queue: &WorkQueue,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(workers > 0, "worker count must be > 0");
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let primary = connector.connect(&ctx.primary).await?;
            let shadow = match &ctx.shadow {
                Some(endpoint) => Some(connector.connect(endpoint).await?),
                None => None,
            };
            let worker = Worker::new(id, primary, shadow, ctx.clone(), seed);
            handles.push(tokio::spawn(worker.run(queue.clone())));
        }
        tracing::info!(workers, primary = %ctx.primary.addr, shadow = ?ctx.shadow.as_ref().map(|e| &e.addr), "worker pool started");
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
