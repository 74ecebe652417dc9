use std::env;
use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::rpc::{RpcRequest, RpcResponse};
use crate::service::RpcService;

const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub async fn run(addr: SocketAddr, service: RpcService) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "lookup server listening");
    serve(listener, service).await
}

/// Accept connections from an already-bound listener until it fails.
pub async fn serve(listener: TcpListener, service: RpcService) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_conn(socket, service).await {
                tracing::debug!(error = ?err, %peer, "rpc connection closed");
            }
        });
    }
}

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(read_env_usize("SORTKV_MAX_FRAME_BYTES", MAX_FRAME_BYTES))
        .new_codec()
}

async fn handle_conn(socket: TcpStream, service: RpcService) -> anyhow::Result<()> {
    socket.set_nodelay(true).ok();
    let mut framed = Framed::new(socket, frame_codec());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let resp = match serde_json::from_slice::<RpcRequest>(&frame) {
            Ok(req) => service.dispatch(&req),
            Err(err) => RpcResponse::Error {
                message: format!("invalid request frame: {err}"),
            },
        };
        let data = serde_json::to_vec(&resp)?;
        framed.send(Bytes::from(data)).await?;
    }
    Ok(())
}

fn read_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
