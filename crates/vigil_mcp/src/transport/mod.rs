//! Transport layer (spec.md §4.1, C9): two concrete transports sharing one
//! framing contract over JSON-RPC 2.0 UTF-8 messages. Generalized from the
//! teacher's synchronous STDIO-only `McpServer::run` loop into an async
//! loop plus a second, length-prefixed TCP transport for manager-launched
//! deployments.

pub mod stdio;
pub mod tcp;

pub use stdio::run_stdio;
pub use tcp::run_tcp;

use std::sync::Arc;

use vigil_protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use vigil_security::sanitize::{validate_frame, FrameLimits};

use crate::dispatcher::{frame_error_to_vigil, Dispatcher};
use crate::session::Session;

/// Validates and dispatches one raw frame, shared by both transports:
/// frame-level rejections (too large, too deep, not valid JSON-RPC) never
/// reach the dispatcher and get an `id: null` error response; anything that
/// parses is handed to `Dispatcher::handle_request`.
pub(crate) async fn dispatch_frame(
    dispatcher: &Dispatcher,
    session: &Arc<Session>,
    raw: &[u8],
    limits: FrameLimits,
) -> Option<JsonRpcResponse> {
    let value = match validate_frame(raw, limits) {
        Ok(v) => v,
        Err(e) => {
            let error = frame_error_to_vigil(e);
            let correlation_id = uuid::Uuid::new_v4();
            return Some(JsonRpcResponse::error(None, error.to_jsonrpc_error(correlation_id)));
        }
    };

    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            let error = vigil_protocol::error::VigilError::Parse(e.to_string());
            let correlation_id = uuid::Uuid::new_v4();
            return Some(JsonRpcResponse::error(None, error.to_jsonrpc_error(correlation_id)));
        }
    };

    dispatcher.handle_request(session, request).await
}
