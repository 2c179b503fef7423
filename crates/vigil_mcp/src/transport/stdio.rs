//! STDIO transport (spec.md §4.1): one session for the process lifetime,
//! newline-delimited JSON-RPC frames on stdin/stdout. Generalized from the
//! teacher's synchronous `McpServer::run` line loop into an async task over
//! `tokio::io`, with frame validation (C9/C7) run before a line is ever
//! deserialized into a `JsonRpcRequest`.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use vigil_protocol::jsonrpc::JsonRpcResponse;
use vigil_security::sanitize::FrameLimits;

use crate::dispatcher::Dispatcher;
use crate::session::Session;

use super::dispatch_frame;

/// Runs the STDIO transport to completion. Returns once stdin is closed
/// (EOF) or `shutdown` fires, whichever comes first.
pub async fn run_stdio(dispatcher: Arc<Dispatcher>, limits: FrameLimits, shutdown: tokio_util::sync::CancellationToken) {
    let session = Session::new("stdio");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    tracing::info!("stdio transport starting");

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = lines.next_line() => result,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break, // EOF
            Err(e) => {
                tracing::error!(error = %e, "stdio read error");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = match dispatch_frame(&dispatcher, &session, line.as_bytes(), limits).await {
            Some(response) => response,
            None => continue,
        };

        if let Err(e) = write_response(&mut stdout, &response).await {
            tracing::error!(error = %e, "stdio write error, closing connection");
            break;
        }
    }

    session.closing.cancel();
    tracing::info!("stdio transport shut down");
}

async fn write_response(
    out: &mut (impl AsyncWriteExt + Unpin),
    response: &JsonRpcResponse,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).unwrap_or_else(|_| {
        serde_json::to_string(&JsonRpcResponse::error(
            None,
            vigil_protocol::jsonrpc::JsonRpcError::new(-32603, "failed to serialize response"),
        ))
        .expect("fallback response always serializes")
    });
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}
