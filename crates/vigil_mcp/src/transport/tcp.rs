//! TCP transport (spec.md §4.1): length-prefixed JSON-RPC frames, one
//! session per accepted connection, for manager-launched deployments where
//! STDIO isn't available. Framing is a 4-byte big-endian length prefix
//! followed by that many bytes of UTF-8 JSON, read and written with
//! `tokio::net::TcpStream` where the teacher's STDIO loop uses line framing.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use vigil_protocol::jsonrpc::JsonRpcResponse;
use vigil_security::sanitize::FrameLimits;

use crate::config::TransportConfig;
use crate::dispatcher::Dispatcher;
use crate::session::Session;

/// Runs the TCP transport to completion, accepting connections until
/// `shutdown` fires. Each connection is handled on its own task; shutdown
/// trips every live session's cancellation token and stops accepting new
/// ones, but does not forcibly close sockets with requests in flight.
pub async fn run_tcp(
    dispatcher: Arc<Dispatcher>,
    config: TransportConfig,
    limits: FrameLimits,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.tcp_bind, config.tcp_port);
    let listener = TcpListener::bind(&addr).await?;
    let permits = Arc::new(Semaphore::new(config.max_connections));
    let idle_timeout = config.idle_timeout();

    tracing::info!(%addr, "tcp transport listening");

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "tcp accept failed");
                continue;
            }
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            tracing::warn!(%peer, "tcp connection refused: max_connections reached");
            drop(stream);
            continue;
        };

        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            let _permit = permit;
            handle_connection(dispatcher, stream, peer.to_string(), limits, idle_timeout, shutdown).await;
        });
    }

    tracing::info!("tcp transport shut down");
    Ok(())
}

async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    mut stream: TcpStream,
    peer: String,
    limits: FrameLimits,
    idle_timeout: std::time::Duration,
    shutdown: CancellationToken,
) {
    let session = Session::new(peer.clone());
    dispatcher.sessions().register(session.clone());
    tracing::info!(%peer, "tcp connection accepted");

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            _ = session.closing.cancelled() => None,
            result = tokio::time::timeout(idle_timeout, read_frame(&mut stream, limits.max_bytes)) => Some(result),
        };

        let raw = match read {
            None => break,
            Some(Ok(Ok(Some(raw)))) => raw,
            Some(Ok(Ok(None))) => break, // peer closed cleanly
            Some(Ok(Err(e))) => {
                tracing::debug!(%peer, error = %e, "tcp read error, closing connection");
                break;
            }
            Some(Err(_)) => {
                tracing::debug!(%peer, "tcp connection idle timeout");
                break;
            }
        };

        let response = super::dispatch_frame(&dispatcher, &session, &raw, limits).await;
        let Some(response) = response else { continue };

        if let Err(e) = write_frame(&mut stream, &response).await {
            tracing::debug!(%peer, error = %e, "tcp write error, closing connection");
            break;
        }
    }

    session.closing.cancel();
    dispatcher.sessions().remove(&peer);
    tracing::info!(%peer, "tcp connection closed");
}

async fn read_frame(stream: &mut TcpStream, max_bytes: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame exceeds max_bytes"));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_frame(stream: &mut TcpStream, response: &JsonRpcResponse) -> std::io::Result<()> {
    let body = serde_json::to_vec(response).unwrap_or_else(|_| {
        serde_json::to_vec(&JsonRpcResponse::error(
            None,
            vigil_protocol::jsonrpc::JsonRpcError::new(-32603, "failed to serialize response"),
        ))
        .expect("fallback response always serializes")
    });
    let len = (body.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(&body).await?;
    stream.flush().await
}
