//! TCP client for the lookup server.

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::rpc::{
    CollectionInfo, InfoRequest, IteratorRequest, IteratorResponse, KeyRequest,
    KeyToValuesResponse, LookupService, MultiValuesResponse, PrefixRequest, PrefixResponse,
    RpcRequest, RpcResponse, SingleValuesResponse, SplitKeyRequest,
};
use crate::server::frame_codec;

type Conn = Framed<TcpStream, LengthDelimitedCodec>;

/// Client over a single connection, opened on first use and reopened after
/// any transport failure. Calls on one client are serialized.
pub struct RpcClient {
    target: String,
    conn: Mutex<Option<Conn>>,
}

impl RpcClient {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            conn: Mutex::new(None),
        }
    }

    /// Create a client and open its connection immediately.
    pub async fn connect(target: impl Into<String>) -> anyhow::Result<Self> {
        let client = Self::new(target);
        *client.conn.lock().await = Some(open(&client.target).await?);
        Ok(client)
    }

    async fn call(&self, req: RpcRequest) -> anyhow::Result<RpcResponse> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(open(&self.target).await?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no connection to {}", self.target))?;

        let result = round_trip(conn, &req).await;
        if result.is_err() {
            // The stream may be mid-frame; start over on the next call.
            *guard = None;
        }
        let resp = result.with_context(|| format!("rpc to {} failed", self.target))?;
        match resp {
            RpcResponse::Error { message } => {
                anyhow::bail!("rpc to {} returned error: {message}", self.target)
            }
            other => Ok(other),
        }
    }
}

async fn open(target: &str) -> anyhow::Result<Conn> {
    let socket = TcpStream::connect(target)
        .await
        .with_context(|| format!("connect to {target}"))?;
    socket.set_nodelay(true).ok();
    Ok(Framed::new(socket, frame_codec()))
}

async fn round_trip(conn: &mut Conn, req: &RpcRequest) -> anyhow::Result<RpcResponse> {
    let data = serde_json::to_vec(req).context("encode request")?;
    conn.send(Bytes::from(data)).await.context("send request")?;
    let frame = conn
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("connection closed"))?
        .context("read response")?;
    serde_json::from_slice(&frame).context("decode response")
}

fn unexpected(op: &str, resp: RpcResponse) -> anyhow::Error {
    anyhow::anyhow!("unexpected response to {op}: {resp:?}")
}

#[async_trait]
impl LookupService for RpcClient {
    async fn get_info(&self, req: &InfoRequest) -> anyhow::Result<Vec<CollectionInfo>> {
        match self.call(RpcRequest::GetInfo(req.clone())).await? {
            RpcResponse::Info(infos) => Ok(infos),
            other => Err(unexpected("get_info", other)),
        }
    }

    async fn get_values_single(&self, req: &KeyRequest) -> anyhow::Result<SingleValuesResponse> {
        match self.call(RpcRequest::GetValuesSingle(req.clone())).await? {
            RpcResponse::Single(resp) => Ok(resp),
            other => Err(unexpected("get_values_single", other)),
        }
    }

    async fn get_values_multi(&self, req: &KeyRequest) -> anyhow::Result<MultiValuesResponse> {
        match self.call(RpcRequest::GetValuesMulti(req.clone())).await? {
            RpcResponse::Multi(resp) => Ok(resp),
            other => Err(unexpected("get_values_multi", other)),
        }
    }

    async fn get_values_for_prefixes(
        &self,
        req: &PrefixRequest,
    ) -> anyhow::Result<PrefixResponse> {
        match self.call(RpcRequest::GetValuesForPrefixes(req.clone())).await? {
            RpcResponse::Prefixes(resp) => Ok(resp),
            other => Err(unexpected("get_values_for_prefixes", other)),
        }
    }

    async fn get_values_multi_split_keys(
        &self,
        req: &SplitKeyRequest,
    ) -> anyhow::Result<KeyToValuesResponse> {
        match self.call(RpcRequest::GetValuesMultiSplitKeys(req.clone())).await? {
            RpcResponse::SplitKeys(resp) => Ok(resp),
            other => Err(unexpected("get_values_multi_split_keys", other)),
        }
    }

    async fn get_iterator(&self, req: &IteratorRequest) -> anyhow::Result<IteratorResponse> {
        match self.call(RpcRequest::GetIterator(req.clone())).await? {
            RpcResponse::Iterator(resp) => Ok(resp),
            other => Err(unexpected("get_iterator", other)),
        }
    }
}
