//! In-process implementation of the lookup operations over a `CollectionSet`.
//!
//! The TCP server in `server.rs` decodes frames and hands them to
//! [`RpcService::dispatch`]; the load harness can also drive this type
//! directly through the [`LookupService`] trait.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::debug;

use crate::collection::CollectionSet;
use crate::lookup;
use crate::rpc::{
    CollectionInfo, InfoRequest, IteratorRequest, IteratorResponse, KeyRequest,
    KeyToValuesResponse, LookupService, MultiValuesResponse, PrefixRequest, PrefixResponse,
    RpcRequest, RpcResponse, SingleValuesResponse, SplitKeyRequest,
};
use crate::scan;

#[derive(Clone)]
pub struct RpcService {
    collections: Arc<CollectionSet>,
    rng: Arc<Mutex<SmallRng>>,
}

impl RpcService {
    pub fn new(collections: CollectionSet, seed: u64) -> Self {
        Self {
            collections: Arc::new(collections),
            rng: Arc::new(Mutex::new(SmallRng::seed_from_u64(seed))),
        }
    }

    /// Answer one decoded request; failures become an error frame.
    pub fn dispatch(&self, req: &RpcRequest) -> RpcResponse {
        let result = match req {
            RpcRequest::GetInfo(req) => self.info(req).map(RpcResponse::Info),
            RpcRequest::GetValuesSingle(req) => self.single(req).map(RpcResponse::Single),
            RpcRequest::GetValuesMulti(req) => self.multi(req).map(RpcResponse::Multi),
            RpcRequest::GetValuesForPrefixes(req) => self.prefixes(req).map(RpcResponse::Prefixes),
            RpcRequest::GetValuesMultiSplitKeys(req) => {
                self.split_keys(req).map(RpcResponse::SplitKeys)
            }
            RpcRequest::GetIterator(req) => self.iterator(req).map(RpcResponse::Iterator),
        };
        result.unwrap_or_else(|err| RpcResponse::Error {
            message: format!("{err:#}"),
        })
    }

    fn info(&self, req: &InfoRequest) -> anyhow::Result<Vec<CollectionInfo>> {
        let sample_size = req.sample_size.unwrap_or(0) as usize;
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| anyhow::anyhow!("sampling rng poisoned"))?;
        let mut out = Vec::new();
        for (name, reader) in self.collections.iter() {
            if req.collection.as_deref().is_some_and(|wanted| wanted != name) {
                continue;
            }
            out.push(CollectionInfo {
                name: name.to_string(),
                entry_count: reader.len() as u64,
                random_keys: reader.random_keys(sample_size, &mut *rng),
            });
        }
        if let Some(wanted) = &req.collection {
            anyhow::ensure!(!out.is_empty(), "unknown collection {wanted:?}");
        }
        debug!(
            collection = ?req.collection,
            sample_size,
            collections = out.len(),
            "[GetInfo]"
        );
        Ok(out)
    }

    fn single(&self, req: &KeyRequest) -> anyhow::Result<SingleValuesResponse> {
        let reader = self.collections.reader_for(&req.collection)?;
        debug!(
            collection = %req.collection,
            keys = req.sorted_keys.len(),
            hex_keys = ?hex_keys(&req.sorted_keys),
            "[GetValuesSingle]"
        );
        let resp = lookup::values_single(reader.as_ref(), &req.sorted_keys)?;
        debug!(
            collection = %req.collection,
            found = resp.found_count,
            of = req.sorted_keys.len(),
            "[GetValuesSingle] done"
        );
        Ok(resp)
    }

    fn multi(&self, req: &KeyRequest) -> anyhow::Result<MultiValuesResponse> {
        let reader = self.collections.reader_for(&req.collection)?;
        debug!(
            collection = %req.collection,
            keys = req.sorted_keys.len(),
            "[GetValuesMulti]"
        );
        lookup::values_multi(reader.as_ref(), &req.sorted_keys)
    }

    fn prefixes(&self, req: &PrefixRequest) -> anyhow::Result<PrefixResponse> {
        let reader = self.collections.reader_for(&req.collection)?;
        debug!(
            collection = %req.collection,
            prefixes = req.sorted_prefixes.len(),
            "[GetValuesForPrefixes]"
        );
        lookup::values_for_prefixes(reader.as_ref(), &req.sorted_prefixes)
    }

    fn split_keys(&self, req: &SplitKeyRequest) -> anyhow::Result<KeyToValuesResponse> {
        let reader = self.collections.reader_for(&req.collection)?;
        debug!(
            collection = %req.collection,
            parts = req.split_key.len(),
            "[GetValuesMultiSplitKeys]"
        );
        lookup::values_for_split_keys(reader.as_ref(), &req.split_key)
    }

    fn iterator(&self, req: &IteratorRequest) -> anyhow::Result<IteratorResponse> {
        let reader = self.collections.reader_for(&req.collection)?;
        let resp = scan::scan_page(reader.as_ref(), req)?;
        debug!(
            collection = %req.collection,
            limit = ?req.response_limit,
            returned = resp.values.len(),
            skip_keys = resp.skip_keys,
            "[GetIterator]"
        );
        Ok(resp)
    }
}

#[async_trait]
impl LookupService for RpcService {
    async fn get_info(&self, req: &InfoRequest) -> anyhow::Result<Vec<CollectionInfo>> {
        self.info(req)
    }

    async fn get_values_single(&self, req: &KeyRequest) -> anyhow::Result<SingleValuesResponse> {
        self.single(req)
    }

    async fn get_values_multi(&self, req: &KeyRequest) -> anyhow::Result<MultiValuesResponse> {
        self.multi(req)
    }

    async fn get_values_for_prefixes(
        &self,
        req: &PrefixRequest,
    ) -> anyhow::Result<PrefixResponse> {
        self.prefixes(req)
    }

    async fn get_values_multi_split_keys(
        &self,
        req: &SplitKeyRequest,
    ) -> anyhow::Result<KeyToValuesResponse> {
        self.split_keys(req)
    }

    async fn get_iterator(&self, req: &IteratorRequest) -> anyhow::Result<IteratorResponse> {
        self.iterator(req)
    }
}

pub fn hex_keys(keys: &[Vec<u8>]) -> Vec<String> {
    keys.iter().map(hex::encode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemCollection;

    fn service() -> RpcService {
        let collections = CollectionSet::new()
            .with_collection("docs", MemCollection::from_pairs([("a", "1"), ("b", "2"), ("b", "3"), ("c", "4")]))
            .with_collection("empty", MemCollection::default());
        RpcService::new(collections, 42)
    }

    #[tokio::test]
    async fn info_lists_every_collection_without_keys_by_default() {
        let infos = service().get_info(&InfoRequest::default()).await.unwrap();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "empty"]);
        assert!(infos.iter().all(|i| i.random_keys.is_empty()));
        assert_eq!(infos[0].entry_count, 4);
    }

    #[tokio::test]
    async fn info_samples_the_named_collection() {
        let req = InfoRequest {
            collection: Some("docs".to_string()),
            sample_size: Some(3),
        };
        let infos = service().get_info(&req).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].random_keys.len(), 3);

        let req = InfoRequest {
            collection: Some("nope".to_string()),
            sample_size: None,
        };
        assert!(service().get_info(&req).await.is_err());
    }

    #[test]
    fn dispatch_turns_failures_into_error_frames() {
        let svc = service();
        let resp = svc.dispatch(&RpcRequest::GetIterator(IteratorRequest {
            collection: "docs".to_string(),
            ..Default::default()
        }));
        match resp {
            RpcResponse::Error { message } => assert!(message.contains("missing response limit")),
            other => panic!("unexpected response: {other:?}"),
        }

        let resp = svc.dispatch(&RpcRequest::GetValuesSingle(KeyRequest {
            collection: "missing".to_string(),
            sorted_keys: vec![b"a".to_vec()],
        }));
        assert!(matches!(resp, RpcResponse::Error { .. }));
    }

    #[test]
    fn dispatch_single_lookup() {
        let resp = service().dispatch(&RpcRequest::GetValuesSingle(KeyRequest {
            collection: "docs".to_string(),
            sorted_keys: vec![b"a".to_vec(), b"x".to_vec()],
        }));
        match resp {
            RpcResponse::Single(single) => {
                assert_eq!(single.found_count, 1);
                assert_eq!(single.values.get(&0), Some(&b"1".to_vec()));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
