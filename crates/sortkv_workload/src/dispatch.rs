//! Rate-limited producer feeding a bounded work queue.
//!
//! The limiter and the queue are separate so each can be driven on its own.
//! [`LoadShedder`] applies the drop-on-full policy to one offer and
//! [`Dispatcher`] calls it once per limiter tick.

use std::time::Duration;

use anyhow::Context;
use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tokio::time::{Interval, MissedTickBehavior};

use crate::metrics::{Counter, Gauge};

/// Upper bound on queued tokens regardless of `qps × workers`.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Unit of work; the worker builds the actual request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    Dropped,
}

/// Fixed-capacity queue with one producer and many consumers.
#[derive(Clone, Debug)]
pub struct WorkQueue {
    tx: Sender<Token>,
    rx: Receiver<Token>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(capacity > 0, "work queue capacity must be > 0");
        let (tx, rx) = async_channel::bounded(capacity);
        Ok(Self { tx, rx })
    }

    /// Queue sized to hold one second of work for every worker, capped at
    /// [`MAX_QUEUE_CAPACITY`].
    pub fn for_rate(qps: u32, workers: usize) -> anyhow::Result<Self> {
        let capacity = (qps as usize)
            .checked_mul(workers)
            .with_context(|| format!("queue capacity {qps} x {workers} overflows"))?;
        Self::new(capacity.min(MAX_QUEUE_CAPACITY))
    }

    /// Enqueue without waiting. A full queue drops the token.
    pub fn try_offer(&self) -> Offer {
        match self.tx.try_send(Token) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => Offer::Dropped,
        }
    }

    /// Wait for the next token.
    pub async fn take(&self) -> Option<Token> {
        self.rx.recv().await.ok()
    }

    pub fn try_take(&self) -> Option<Token> {
        match self.rx.try_recv() {
            Ok(token) => Some(token),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    pub fn depth(&self) -> usize {
        self.tx.len()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

/// Fires once every `1s / qps`. Late ticks are skipped, not bursted.
#[derive(Debug)]
pub struct TickLimiter {
    interval: Interval,
}

impl TickLimiter {
    pub fn new(qps: u32) -> anyhow::Result<Self> {
        anyhow::ensure!(qps > 0, "qps must be > 0");
        Ok(Self::with_period(Self::period_for(qps)))
    }

    pub fn with_period(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period_for(qps: u32) -> Duration {
        Duration::from_secs(1) / qps.max(1)
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Offers tokens to the queue, dropping and counting them when it is full.
#[derive(Clone, Debug)]
pub struct LoadShedder {
    queue: WorkQueue,
    dropped: Counter,
    depth: Gauge,
}

impl LoadShedder {
    pub fn new(queue: WorkQueue, dropped: Counter, depth: Gauge) -> Self {
        Self {
            queue,
            dropped,
            depth,
        }
    }

    /// Publish the current depth, then offer a single token.
    pub fn offer(&self) -> Offer {
        self.depth.set(self.queue.depth() as i64);
        let offer = self.queue.try_offer();
        if offer == Offer::Dropped {
            self.dropped.inc();
        }
        offer
    }
}

pub struct Dispatcher {
    limiter: TickLimiter,
    shedder: LoadShedder,
}

impl Dispatcher {
    pub fn new(limiter: TickLimiter, shedder: LoadShedder) -> Self {
        Self { limiter, shedder }
    }

    /// Produce forever at the limiter's rate.
    pub async fn run(mut self) {
        tracing::info!(
            period = ?self.limiter.period(),
            capacity = self.shedder.queue.capacity(),
            "dispatcher started"
        );
        loop {
            self.limiter.tick().await;
            self.shedder.offer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_and_counts() {
        let queue = WorkQueue::new(4).unwrap();
        let dropped = Counter::default();
        let depth = Gauge::default();
        let shedder = LoadShedder::new(queue.clone(), dropped.clone(), depth.clone());

        let mut last_dropped = 0;
        for step in 0..20 {
            let offer = shedder.offer();
            assert!(queue.depth() <= queue.capacity());
            if step < 4 {
                assert_eq!(offer, Offer::Accepted);
            } else {
                assert_eq!(offer, Offer::Dropped);
                assert!(dropped.get() > last_dropped);
                assert_eq!(queue.depth(), 4);
            }
            last_dropped = dropped.get();
        }
        assert_eq!(dropped.get(), 16);
        assert_eq!(depth.get(), 4);
    }

    #[test]
    fn slow_consumer_keeps_queue_at_capacity() {
        let queue = WorkQueue::new(8).unwrap();
        let dropped = Counter::default();
        let shedder = LoadShedder::new(queue.clone(), dropped.clone(), Gauge::default());
        // Consumer drains one token for every three produced.
        let mut last_dropped = 0;
        for step in 0..300 {
            shedder.offer();
            if step % 3 == 0 {
                assert!(queue.try_take().is_some());
            }
            assert!(queue.depth() <= 8);
            assert!(dropped.get() >= last_dropped);
            last_dropped = dropped.get();
        }
        assert_eq!(queue.depth(), 8);
        assert!(dropped.get() > 150);
    }

    #[test]
    fn rate_sized_queue_is_checked_and_capped() {
        assert_eq!(WorkQueue::for_rate(100, 8).unwrap().capacity(), 800);
        assert_eq!(
            WorkQueue::for_rate(u32::MAX, 1 << 20).unwrap().capacity(),
            MAX_QUEUE_CAPACITY
        );
        assert!(WorkQueue::for_rate(u32::MAX, usize::MAX).is_err());
        assert!(WorkQueue::for_rate(100, 0).is_err());
    }

    #[test]
    fn rejects_zero_rates_and_sizes() {
        assert!(WorkQueue::new(0).is_err());
        assert!(TickLimiter::new(0).is_err());
        assert_eq!(TickLimiter::period_for(100), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_ticks_at_configured_rate() {
        let mut limiter = TickLimiter::new(10).unwrap();
        let start = tokio::time::Instant::now();
        // First tick completes immediately.
        for _ in 0..11 {
            limiter.tick().await;
        }
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_run_fills_queue_then_drops() {
        let queue = WorkQueue::new(5).unwrap();
        let dropped = Counter::default();
        let dispatcher = Dispatcher::new(
            TickLimiter::new(100).unwrap(),
            LoadShedder::new(queue.clone(), dropped.clone(), Gauge::default()),
        );
        let task = tokio::spawn(dispatcher.run());
        tokio::time::sleep(Duration::from_millis(205)).await;
        task.abort();

        assert_eq!(queue.depth(), 5);
        assert!(dropped.get() >= 15, "dropped {}", dropped.get());
        assert!(queue.take().await.is_some());
    }
}
