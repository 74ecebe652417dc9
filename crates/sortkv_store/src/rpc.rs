//! Request/response messages shared by the server, the client and the load
//! harness, plus the [`LookupService`] seam they all speak through.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoRequest {
    pub collection: Option<String>,
    pub sample_size: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub entry_count: u64,
    pub random_keys: Vec<Vec<u8>>,
}

/// Lookup of a sorted batch of keys in one collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub collection: String,
    pub sorted_keys: Vec<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleValuesResponse {
    /// Request index -> first value stored under that key.
    pub values: BTreeMap<u32, Vec<u8>>,
    pub found_count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValuesResponse {
    /// Request index -> every value stored under that key.
    pub values: BTreeMap<u32, Vec<Vec<u8>>>,
    pub found_count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PrefixRequest {
    pub collection: String,
    pub sorted_prefixes: Vec<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixResponse {
    #[serde(with = "byte_key_map")]
    pub values: BTreeMap<Vec<u8>, Vec<Vec<u8>>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SplitKeyRequest {
    pub collection: String,
    /// Key parts; every combination across the lists is concatenated into
    /// one lookup key.
    pub split_key: Vec<Vec<Vec<u8>>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyToValuesResponse {
    #[serde(with = "byte_key_map")]
    pub values: BTreeMap<Vec<u8>, Vec<Vec<u8>>>,
}

/// One page request of a resumable scan.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct IteratorRequest {
    pub collection: String,
    /// Defaults to true; false returns empty value placeholders.
    pub include_values: Option<bool>,
    pub last_key: Option<Vec<u8>>,
    pub skip_keys: Option<u32>,
    /// Required. Requests without it are rejected.
    pub response_limit: Option<u32>,
    /// Exclusive upper bound.
    pub end_key: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyValueItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct IteratorResponse {
    pub values: Vec<KeyValueItem>,
    /// Pass back as `last_key` to resume.
    pub last_key: Option<Vec<u8>>,
    /// Pass back as `skip_keys` to resume.
    pub skip_keys: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
pub enum RpcRequest {
    GetInfo(InfoRequest),
    GetValuesSingle(KeyRequest),
    GetValuesMulti(KeyRequest),
    GetValuesForPrefixes(PrefixRequest),
    GetValuesMultiSplitKeys(SplitKeyRequest),
    GetIterator(IteratorRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum RpcResponse {
    Info(Vec<CollectionInfo>),
    Single(SingleValuesResponse),
    Multi(MultiValuesResponse),
    Prefixes(PrefixResponse),
    SplitKeys(KeyToValuesResponse),
    Iterator(IteratorResponse),
    Error { message: String },
}

/// The lookup operations a sorted key-value server exposes.
#[async_trait]
pub trait LookupService: Send + Sync {
    async fn get_info(&self, req: &InfoRequest) -> anyhow::Result<Vec<CollectionInfo>>;

    async fn get_values_single(&self, req: &KeyRequest) -> anyhow::Result<SingleValuesResponse>;

    async fn get_values_multi(&self, req: &KeyRequest) -> anyhow::Result<MultiValuesResponse>;

    async fn get_values_for_prefixes(&self, req: &PrefixRequest)
        -> anyhow::Result<PrefixResponse>;

    async fn get_values_multi_split_keys(
        &self,
        req: &SplitKeyRequest,
    ) -> anyhow::Result<KeyToValuesResponse>;

    async fn get_iterator(&self, req: &IteratorRequest) -> anyhow::Result<IteratorResponse>;
}

/// Serializes byte-keyed maps as ordered `(key, values)` pairs; JSON object
/// keys must be strings.
mod byte_key_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(map: &BTreeMap<Vec<u8>, Vec<Vec<u8>>>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<BTreeMap<Vec<u8>, Vec<Vec<u8>>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(Vec<u8>, Vec<Vec<u8>>)>::deserialize(d)?;
        Ok(pairs.into_iter().collect())
    }
}
