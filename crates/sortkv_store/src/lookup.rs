use std::collections::BTreeMap;

use crate::collection::SortedReader;
use crate::rpc::{KeyToValuesResponse, MultiValuesResponse, PrefixResponse, SingleValuesResponse};

pub fn values_single(
    reader: &dyn SortedReader,
    sorted_keys: &[Vec<u8>],
) -> anyhow::Result<SingleValuesResponse> {
    let mut out = SingleValuesResponse::default();
    for (idx, key) in sorted_keys.iter().enumerate() {
        if let Some(value) = reader.first_value(key)? {
            out.values.insert(idx as u32, value);
            out.found_count += 1;
        }
    }
    Ok(out)
}

/// `found_count` counts values, not keys.
pub fn values_multi(
    reader: &dyn SortedReader,
    sorted_keys: &[Vec<u8>],
) -> anyhow::Result<MultiValuesResponse> {
    let mut out = MultiValuesResponse::default();
    for (idx, key) in sorted_keys.iter().enumerate() {
        let values = reader.all_values(key)?;
        if !values.is_empty() {
            out.found_count += values.len() as u32;
            out.values.insert(idx as u32, values);
        }
    }
    Ok(out)
}

pub fn values_for_prefixes(
    reader: &dyn SortedReader,
    sorted_prefixes: &[Vec<u8>],
) -> anyhow::Result<PrefixResponse> {
    let mut values = BTreeMap::new();
    for prefix in sorted_prefixes {
        let found = reader.values_for_prefix(prefix)?;
        if !found.is_empty() {
            values.insert(prefix.clone(), found);
        }
    }
    Ok(PrefixResponse { values })
}

pub fn values_for_split_keys(
    reader: &dyn SortedReader,
    split_key: &[Vec<Vec<u8>>],
) -> anyhow::Result<KeyToValuesResponse> {
    let mut values = BTreeMap::new();
    for parts in rev_product(split_key) {
        let key = parts.concat();
        let found = reader.all_values(&key)?;
        if !found.is_empty() {
            values.insert(key, found);
        }
    }
    Ok(KeyToValuesResponse { values })
}

/// Cartesian product of `lists`, with the first list varying fastest.
///
/// Callers have historically depended on this order, so it is kept even
/// though the lookup result is keyed and order-insensitive today.
pub fn rev_product(lists: &[Vec<Vec<u8>>]) -> Vec<Vec<&[u8]>> {
    if lists.is_empty() || lists.iter().any(Vec::is_empty) {
        return Vec::new();
    }
    let total = lists.iter().map(Vec::len).product();
    let mut out = Vec::with_capacity(total);
    let mut idx = vec![0usize; lists.len()];
    loop {
        out.push(
            lists
                .iter()
                .zip(&idx)
                .map(|(list, &i)| list[i].as_slice())
                .collect(),
        );
        // Odometer increment from the front.
        let mut pos = 0;
        loop {
            if pos == lists.len() {
                return out;
            }
            idx[pos] += 1;
            if idx[pos] < lists[pos].len() {
                break;
            }
            idx[pos] = 0;
            pos += 1;
        }
    }
}
