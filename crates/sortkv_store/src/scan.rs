//! Stateless, resumable paging over one collection's ordered entries.
//!
//! All continuation state travels in the `(last_key, skip_keys)` cursor. The
//! cursor names the entry at offset `skip_keys` inside the run of entries
//! keyed `last_key`, so a page that ends in the middle of a run of duplicate
//! keys resumes on the next entry of that run rather than after the run.

use crate::collection::{EntryIter, SortedReader};
use crate::rpc::{IteratorRequest, IteratorResponse, KeyValueItem};

/// Counts how many consecutive entries share the most recent key.
#[derive(Debug, Default)]
struct DuplicateRun {
    prev: Option<Vec<u8>>,
    count: u32,
}

impl DuplicateRun {
    fn observe(&mut self, key: &[u8]) {
        match &self.prev {
            Some(prev) if prev.as_slice() == key => self.count = self.count.saturating_add(1),
            _ => {
                self.count = 0;
                self.prev = Some(key.to_vec());
            }
        }
    }
}

/// Produce one page for `req`. Fails without a partial page when the limit
/// is missing or the iterator reports an error.
pub fn scan_page(reader: &dyn SortedReader, req: &IteratorRequest) -> anyhow::Result<IteratorResponse> {
    let Some(limit) = req.response_limit else {
        anyhow::bail!("missing response limit");
    };
    let limit = limit as usize;
    let include_values = req.include_values.unwrap_or(true);
    let end_key = req.end_key.as_deref();

    let mut it = reader.iter();
    let mut run = DuplicateRun::default();
    let mut remaining = position(it.as_mut(), req.last_key.as_deref(), &mut run)?;

    for _ in 0..req.skip_keys.unwrap_or(0) {
        if !remaining {
            break;
        }
        run.observe(it.key());
        remaining = it.advance()?;
    }

    let past_end = |key: &[u8]| end_key.is_some_and(|end| key >= end);
    if !remaining || past_end(it.key()) {
        return Ok(empty_page(req));
    }

    let mut values = Vec::with_capacity(limit.min(1024));
    while remaining && values.len() < limit && !past_end(it.key()) {
        let key = it.key().to_vec();
        let value = if include_values {
            it.value().to_vec()
        } else {
            Vec::new()
        };
        run.observe(&key);
        values.push(KeyValueItem { key, value });
        remaining = it.advance()?;
    }

    let Some(last) = values.last() else {
        return Ok(empty_page(req));
    };
    let last_key = Some(last.key.clone());
    Ok(IteratorResponse {
        values,
        last_key,
        skip_keys: run.count,
    })
}

/// Place `it` on the first entry after the one the cursor's key anchors.
fn position(
    it: &mut dyn EntryIter,
    last_key: Option<&[u8]>,
    run: &mut DuplicateRun,
) -> anyhow::Result<bool> {
    let Some(last_key) = last_key else {
        return it.advance();
    };
    let remaining = it.seek(last_key)?;
    if remaining && it.key() == last_key {
        run.observe(last_key);
        return it.advance();
    }
    Ok(remaining)
}

fn empty_page(req: &IteratorRequest) -> IteratorResponse {
    IteratorResponse {
        values: Vec::new(),
        last_key: req.last_key.clone(),
        skip_keys: req.skip_keys.unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemCollection;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn docs() -> MemCollection {
        MemCollection::from_pairs([("a", "1"), ("b", "2"), ("b", "3"), ("c", "4")])
    }

    fn page(limit: u32) -> IteratorRequest {
        IteratorRequest {
            collection: "docs".to_string(),
            response_limit: Some(limit),
            ..Default::default()
        }
    }

    fn resume(limit: u32, prev: &IteratorResponse) -> IteratorRequest {
        IteratorRequest {
            last_key: prev.last_key.clone(),
            skip_keys: Some(prev.skip_keys),
            ..page(limit)
        }
    }

    fn keys(resp: &IteratorResponse) -> Vec<&[u8]> {
        resp.values.iter().map(|item| item.key.as_slice()).collect()
    }

    #[test]
    fn resumes_inside_a_duplicate_run() {
        let c = docs();
        let first = scan_page(&c, &page(2)).unwrap();
        assert_eq!(keys(&first), vec![&b"a"[..], b"b"]);
        assert_eq!(first.last_key.as_deref(), Some(&b"b"[..]));
        assert_eq!(first.skip_keys, 0);

        let second = scan_page(&c, &resume(2, &first)).unwrap();
        assert_eq!(keys(&second), vec![&b"b"[..], b"c"]);
        assert_eq!(second.values[0].value, b"3");
    }

    #[test]
    fn single_entry_pages_walk_a_long_run() {
        let c = MemCollection::from_pairs([("k", "0"), ("k", "1"), ("k", "2"), ("z", "3")]);
        let mut resp = scan_page(&c, &page(1)).unwrap();
        let mut seen = vec![resp.values[0].value.clone()];
        loop {
            resp = scan_page(&c, &resume(1, &resp)).unwrap();
            if resp.values.is_empty() {
                break;
            }
            seen.push(resp.values[0].value.clone());
        }
        assert_eq!(seen, vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn missing_limit_is_rejected() {
        let req = IteratorRequest {
            collection: "docs".to_string(),
            ..Default::default()
        };
        let err = scan_page(&docs(), &req).unwrap_err();
        assert!(err.to_string().contains("missing response limit"));
    }

    #[test]
    fn end_key_is_exclusive() {
        let c = docs();
        let req = IteratorRequest {
            end_key: Some(b"b".to_vec()),
            ..page(10)
        };
        let resp = scan_page(&c, &req).unwrap();
        assert_eq!(keys(&resp), vec![&b"a"[..]]);

        let req = IteratorRequest {
            end_key: Some(b"a".to_vec()),
            ..page(10)
        };
        assert!(scan_page(&c, &req).unwrap().values.is_empty());
    }

    #[test]
    fn omitting_values_returns_empty_placeholders() {
        let req = IteratorRequest {
            include_values: Some(false),
            ..page(10)
        };
        let resp = scan_page(&docs(), &req).unwrap();
        assert_eq!(resp.values.len(), 4);
        assert!(resp.values.iter().all(|item| item.value.is_empty()));
    }

    #[test]
    fn skipping_past_the_end_returns_an_empty_page() {
        let req = IteratorRequest {
            last_key: Some(b"b".to_vec()),
            skip_keys: Some(5),
            ..page(10)
        };
        let resp = scan_page(&docs(), &req).unwrap();
        assert!(resp.values.is_empty());
        assert_eq!(resp.last_key.as_deref(), Some(&b"b"[..]));
        assert_eq!(resp.skip_keys, 5);
    }

    #[test]
    fn cursor_past_every_key_is_empty() {
        let req = IteratorRequest {
            last_key: Some(b"zz".to_vec()),
            ..page(3)
        };
        assert!(scan_page(&docs(), &req).unwrap().values.is_empty());
    }

    #[test]
    fn absent_last_key_starts_after_a_missing_key() {
        let req = IteratorRequest {
            last_key: Some(b"ba".to_vec()),
            ..page(3)
        };
        let resp = scan_page(&docs(), &req).unwrap();
        assert_eq!(keys(&resp), vec![&b"c"[..]]);
    }

    #[test]
    fn any_page_partition_reproduces_the_full_scan() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for round in 0..200 {
            let len = rng.gen_range(0..40);
            let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..len)
                .map(|i| {
                    let key = vec![b'a' + rng.gen_range(0..5u8)];
                    (key, format!("{round}:{i}").into_bytes())
                })
                .collect();
            let c = MemCollection::new(entries);
            let end_key = if rng.gen_bool(0.3) {
                Some(vec![b'a' + rng.gen_range(0..6u8)])
            } else {
                None
            };

            let full = scan_page(
                &c,
                &IteratorRequest {
                    end_key: end_key.clone(),
                    ..page(u32::MAX)
                },
            )
            .unwrap();
            if let Some(end) = &end_key {
                assert!(full.values.iter().all(|item| item.key < *end));
            }

            let mut paged = Vec::new();
            let mut cursor: Option<IteratorResponse> = None;
            loop {
                let limit = rng.gen_range(1..6);
                let mut req = match &cursor {
                    Some(prev) => resume(limit, prev),
                    None => page(limit),
                };
                req.end_key = end_key.clone();
                let resp = scan_page(&c, &req).unwrap();
                let done = resp.values.len() < limit as usize;
                paged.extend(resp.values.iter().cloned());
                cursor = Some(resp);
                if done {
                    break;
                }
            }
            assert_eq!(paged, full.values, "round {round}");
        }
    }
}
