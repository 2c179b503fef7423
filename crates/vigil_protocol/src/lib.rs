//! MCP (Model Context Protocol) wire format and error taxonomy.
//!
//! Implements JSON-RPC 2.0 framing for the tool-calling protocol spoken
//! between AI clients and the Vigil Sentry server, plus the stable error
//! code table the rest of the workspace maps its failures onto.

pub mod error;
pub mod jsonrpc;
pub mod mcp;

pub use error::{ErrorCode, VigilError};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, JSONRPC_VERSION};
pub use mcp::{
    CallToolParams, ContentBlock, InitializeParams, InitializeResult, ServerCapabilities,
    ServerInfo, ToolCallResult, ToolDefinition, ToolsListResult, MCP_PROTOCOL_VERSION,
};
