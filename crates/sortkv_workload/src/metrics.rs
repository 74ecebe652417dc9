//! In-process metrics for the load harness.
//!
//! Handles are cheap to clone and lock-free to update; the registry lock is
//! only taken when a name is first looked up or a snapshot is taken.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Monotonic event counter.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-written value.
#[derive(Clone, Debug, Default)]
pub struct Gauge(Arc<AtomicI64>);

impl Gauge {
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct TimerStats {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

/// Latency series: count, total and max in microseconds.
#[derive(Clone, Debug, Default)]
pub struct Timer(Arc<TimerStats>);

impl Timer {
    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        self.0.count.fetch_add(1, Ordering::Relaxed);
        self.0.total_us.fetch_add(us, Ordering::Relaxed);
        self.0.max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            count: self.0.count.load(Ordering::Relaxed),
            total_us: self.0.total_us.load(Ordering::Relaxed),
            max_us: self.0.max_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub count: u64,
    pub total_us: u64,
    pub max_us: u64,
}

impl TimerSnapshot {
    pub fn avg_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_us as f64 / self.count as f64
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
    pub timers: BTreeMap<String, TimerSnapshot>,
}

/// Named metric registry shared by the dispatcher, workers and reporters.
#[derive(Debug, Default)]
pub struct Recorder {
    counters: Mutex<BTreeMap<String, Counter>>,
    gauges: Mutex<BTreeMap<String, Gauge>>,
    timers: Mutex<BTreeMap<String, Timer>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counter(&self, name: &str) -> Counter {
        lookup(&self.counters, name)
    }

    pub fn gauge(&self, name: &str) -> Gauge {
        lookup(&self.gauges, name)
    }

    pub fn timer(&self, name: &str) -> Timer {
        lookup(&self.timers, name)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: collect(&self.counters, Counter::get),
            gauges: collect(&self.gauges, Gauge::get),
            timers: collect(&self.timers, Timer::snapshot),
        }
    }

    /// Log a snapshot every `every`, with counter deltas since the last one.
    pub fn spawn_console_logger(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let recorder = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            let mut prev = recorder.snapshot();
            loop {
                ticker.tick().await;
                let snap = recorder.snapshot();
                for (name, value) in &snap.counters {
                    let delta = value.saturating_sub(prev.counters.get(name).copied().unwrap_or(0));
                    let rate = delta as f64 / every.as_secs_f64().max(f64::EPSILON);
                    tracing::info!(metric = %name, total = value, delta, rate = %format!("{rate:.2}/s"), "counter");
                }
                for (name, value) in &snap.gauges {
                    tracing::info!(metric = %name, value, "gauge");
                }
                for (name, timer) in &snap.timers {
                    tracing::info!(
                        metric = %name,
                        count = timer.count,
                        avg_us = %format!("{:.2}", timer.avg_us()),
                        max_us = timer.max_us,
                        "timer"
                    );
                }
                prev = snap;
            }
        })
    }

    /// Push snapshots to a Graphite plaintext endpoint every `every`.
    /// Failed pushes are logged and retried on the next interval.
    pub fn spawn_graphite_reporter(
        self: &Arc<Self>,
        target: String,
        prefix: String,
        every: Duration,
    ) -> JoinHandle<()> {
        let recorder = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let payload = graphite_lines(&recorder.snapshot(), &prefix, now);
                if let Err(err) = push(&target, payload.as_bytes()).await {
                    tracing::warn!(error = ?err, %target, "graphite push failed");
                }
            }
        })
    }
}

/// Render a snapshot in Graphite plaintext format.
pub fn graphite_lines(snap: &MetricsSnapshot, prefix: &str, unix_secs: u64) -> String {
    let mut out = String::new();
    let mut line = |name: &str, value: String| {
        if prefix.is_empty() {
            out.push_str(&format!("{name} {value} {unix_secs}\n"));
        } else {
            out.push_str(&format!("{prefix}.{name} {value} {unix_secs}\n"));
        }
    };
    for (name, value) in &snap.counters {
        line(&format!("{name}.count"), value.to_string());
    }
    for (name, value) in &snap.gauges {
        line(&format!("{name}.value"), value.to_string());
    }
    for (name, timer) in &snap.timers {
        line(&format!("{name}.count"), timer.count.to_string());
        line(&format!("{name}.avg_us"), format!("{:.2}", timer.avg_us()));
        line(&format!("{name}.max_us"), timer.max_us.to_string());
    }
    out
}

async fn push(target: &str, payload: &[u8]) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(target).await?;
    stream.write_all(payload).await?;
    stream.shutdown().await?;
    Ok(())
}

fn lookup<T: Clone + Default>(map: &Mutex<BTreeMap<String, T>>, name: &str) -> T {
    match map.lock() {
        Ok(mut guard) => guard.entry(name.to_string()).or_default().clone(),
        // A poisoned registry still hands out a working, unregistered handle.
        Err(_) => T::default(),
    }
}

fn collect<T, V>(map: &Mutex<BTreeMap<String, T>>, read: impl Fn(&T) -> V) -> BTreeMap<String, V> {
    match map.lock() {
        Ok(guard) => guard.iter().map(|(k, v)| (k.clone(), read(v))).collect(),
        Err(_) => BTreeMap::new(),
    }
}
