use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rand::RngCore;

/// Positional forward iterator over one collection's ordered entries.
///
/// A fresh iterator sits before the first entry: call `advance` (or `seek`)
/// before reading `key`/`value`. Both positioning calls return `false` once
/// the iterator is exhausted, after which `key`/`value` return empty slices.
pub trait EntryIter {
    /// Move to the next entry.
    fn advance(&mut self) -> anyhow::Result<bool>;
    /// Position at the first entry whose key is >= `key`.
    fn seek(&mut self, key: &[u8]) -> anyhow::Result<bool>;
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
}

/// Read-only view of a sorted key-value collection. Keys may repeat.
pub trait SortedReader: Send + Sync + 'static {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key_at(&self, index: usize) -> Option<&[u8]>;

    fn iter(&self) -> Box<dyn EntryIter + '_>;

    /// First value stored under `key`.
    fn first_value(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let mut it = self.iter();
        if it.seek(key)? && it.key() == key {
            return Ok(Some(it.value().to_vec()));
        }
        Ok(None)
    }

    /// Every value stored under `key`, in stored order.
    fn all_values(&self, key: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut it = self.iter();
        let mut remaining = it.seek(key)?;
        while remaining && it.key() == key {
            out.push(it.value().to_vec());
            remaining = it.advance()?;
        }
        Ok(out)
    }

    /// Every value whose key starts with `prefix`, in stored order.
    fn values_for_prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut it = self.iter();
        let mut remaining = it.seek(prefix)?;
        while remaining && it.key().starts_with(prefix) {
            out.push(it.value().to_vec());
            remaining = it.advance()?;
        }
        Ok(out)
    }

    /// Up to `count` keys from distinct, uniformly chosen positions.
    fn random_keys(&self, count: usize, rng: &mut dyn RngCore) -> Vec<Vec<u8>> {
        let len = self.len();
        let amount = count.min(len);
        if amount == 0 {
            return Vec::new();
        }
        rand::seq::index::sample(rng, len, amount)
            .into_iter()
            .filter_map(|idx| self.key_at(idx).map(<[u8]>::to_vec))
            .collect()
    }
}

/// In-memory collection backed by a sorted vector of entries.
#[derive(Clone, Debug, Default)]
pub struct MemCollection {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MemCollection {
    /// Builds a collection, sorting by raw key bytes. Entries sharing a key
    /// keep their relative order.
    pub fn new(mut entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_vec(), v.as_ref().to_vec()))
                .collect(),
        )
    }

    pub fn entries(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.entries
    }
}

impl SortedReader for MemCollection {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn key_at(&self, index: usize) -> Option<&[u8]> {
        self.entries.get(index).map(|(k, _)| k.as_slice())
    }

    fn iter(&self) -> Box<dyn EntryIter + '_> {
        Box::new(MemIter {
            entries: &self.entries,
            pos: None,
        })
    }
}

struct MemIter<'a> {
    entries: &'a [(Vec<u8>, Vec<u8>)],
    pos: Option<usize>,
}

impl MemIter<'_> {
    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.pos.and_then(|pos| self.entries.get(pos))
    }
}

impl EntryIter for MemIter<'_> {
    fn advance(&mut self) -> anyhow::Result<bool> {
        let next = self.pos.map_or(0, |pos| pos.saturating_add(1));
        self.pos = Some(next.min(self.entries.len()));
        Ok(next < self.entries.len())
    }

    fn seek(&mut self, key: &[u8]) -> anyhow::Result<bool> {
        let idx = self.entries.partition_point(|(k, _)| k.as_slice() < key);
        self.pos = Some(idx);
        Ok(idx < self.entries.len())
    }

    fn key(&self) -> &[u8] {
        self.current().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }
}

/// Named collections served by one process.
#[derive(Clone, Default)]
pub struct CollectionSet {
    readers: BTreeMap<String, Arc<dyn SortedReader>>,
}

impl CollectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, reader: Arc<dyn SortedReader>) {
        self.readers.insert(name.into(), reader);
    }

    pub fn with_collection(mut self, name: impl Into<String>, reader: impl SortedReader) -> Self {
        self.insert(name, Arc::new(reader));
        self
    }

    pub fn reader_for(&self, name: &str) -> anyhow::Result<Arc<dyn SortedReader>> {
        self.readers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown collection {name:?}"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn SortedReader>)> {
        self.readers.iter().map(|(name, reader)| (name.as_str(), reader))
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

/// Encode entries as `[u32 key_len][key][u32 value_len][value]` records.
pub fn encode_entries(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let size = entries.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut out = Vec::with_capacity(size);
    for (key, value) in entries {
        out.extend_from_slice(&(key.len() as u32).to_be_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value);
    }
    out
}

/// Decode records written by [`encode_entries`]. Keys must be ascending.
pub fn decode_entries(data: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut offset = 0usize;
    let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    while offset < data.len() {
        let key = read_chunk(data, &mut offset).context("short key")?;
        let value = read_chunk(data, &mut offset).context("short value")?;
        if let Some((prev, _)) = out.last() {
            anyhow::ensure!(
                prev.as_slice() <= key,
                "record {} key {} sorts before {}",
                out.len(),
                hex::encode(key),
                hex::encode(prev)
            );
        }
        out.push((key.to_vec(), value.to_vec()));
    }
    Ok(out)
}

pub fn load_collection_file(path: &Path) -> anyhow::Result<MemCollection> {
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let entries = decode_entries(&data).with_context(|| format!("decode {}", path.display()))?;
    Ok(MemCollection { entries })
}

pub fn write_collection_file(path: &Path, collection: &MemCollection) -> anyhow::Result<()> {
    std::fs::write(path, encode_entries(collection.entries()))
        .with_context(|| format!("write {}", path.display()))
}

fn read_chunk<'a>(data: &'a [u8], offset: &mut usize) -> anyhow::Result<&'a [u8]> {
    let len = read_u32(data, offset)? as usize;
    anyhow::ensure!(*offset + len <= data.len(), "short chunk");
    let out = &data[*offset..*offset + len];
    *offset += len;
    Ok(out)
}

fn read_u32(data: &[u8], offset: &mut usize) -> anyhow::Result<u32> {
    anyhow::ensure!(*offset + 4 <= data.len(), "short u32");
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[*offset..*offset + 4]);
    *offset += 4;
    Ok(u32::from_be_bytes(buf))
}
