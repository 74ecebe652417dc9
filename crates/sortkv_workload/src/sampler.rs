//! Periodically refreshed snapshot of known keys for one collection.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use sortkv_store::rpc::InfoRequest;
use sortkv_store::LookupService;
use tokio::task::JoinHandle;

/// Sorted, non-empty set of keys. Duplicates are kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySample {
    keys: Vec<Vec<u8>>,
}

impl KeySample {
    pub fn new(mut keys: Vec<Vec<u8>>) -> anyhow::Result<Self> {
        anyhow::ensure!(!keys.is_empty(), "key sample must not be empty");
        keys.sort();
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }
}

/// Holds the active [`KeySample`] behind a swappable pointer. Readers clone
/// the `Arc` and never observe a half-replaced set.
#[derive(Debug)]
pub struct KeySampler {
    collection: String,
    sample_size: u32,
    current: RwLock<Option<Arc<KeySample>>>,
}

impl KeySampler {
    pub fn new(collection: impl Into<String>, sample_size: u32) -> Self {
        Self {
            collection: collection.into(),
            sample_size,
            current: RwLock::new(None),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn snapshot(&self) -> Option<Arc<KeySample>> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    pub fn install(&self, sample: KeySample) {
        let sample = Arc::new(sample);
        match self.current.write() {
            Ok(mut guard) => *guard = Some(sample),
            Err(poisoned) => *poisoned.into_inner() = Some(sample),
        }
    }

    /// Fetch a fresh random key set and swap it in. On failure the previous
    /// sample stays active. Returns the new sample's size.
    pub async fn refresh<S>(&self, info: &S) -> anyhow::Result<usize>
    where
        S: LookupService + ?Sized,
    {
        let req = InfoRequest {
            collection: Some(self.collection.clone()),
            sample_size: Some(self.sample_size),
        };
        let infos = info.get_info(&req).await?;
        anyhow::ensure!(!infos.is_empty(), "response contained no collections");
        let selected = infos
            .into_iter()
            .find(|i| i.name == self.collection)
            .ok_or_else(|| anyhow::anyhow!("response did not include {:?}", self.collection))?;
        anyhow::ensure!(
            !selected.random_keys.is_empty(),
            "collection {:?} returned no keys",
            self.collection
        );
        let sample = KeySample::new(selected.random_keys)?;
        let len = sample.len();
        self.install(sample);
        Ok(len)
    }

    /// Draw `n` keys uniformly with replacement, returned in ascending order.
    /// Fails before the first successful refresh.
    pub fn sample<R>(&self, n: usize, rng: &mut R) -> anyhow::Result<Vec<Vec<u8>>>
    where
        R: Rng + ?Sized,
    {
        let sample = self
            .snapshot()
            .ok_or_else(|| anyhow::anyhow!("key sample for {:?} not initialized", self.collection))?;
        let mut indexes: Vec<usize> = (0..n).map(|_| rng.gen_range(0..sample.len())).collect();
        indexes.sort_unstable();
        Ok(indexes.into_iter().map(|i| sample.keys[i].clone()).collect())
    }

    /// Refresh every `every` until the task is aborted. Failures keep the
    /// current sample and are retried on the next tick.
    pub fn spawn_refresher<S>(self: Arc<Self>, info: Arc<S>, every: Duration) -> JoinHandle<()>
    where
        S: LookupService + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::info!(collection = %self.collection, "fetching new keys");
                match self.refresh(info.as_ref()).await {
                    Ok(len) => tracing::info!(collection = %self.collection, keys = len, "key sample refreshed"),
                    Err(err) => tracing::warn!(error = ?err, collection = %self.collection, "key refresh failed; keeping previous sample"),
                }
            }
        })
    }
}
