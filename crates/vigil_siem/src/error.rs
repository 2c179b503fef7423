use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiemError {
    #[error("store connection failed: {0}")]
    Transport(String),
    #[error("store returned an error response: {0}")]
    StoreResponse(String),
    #[error("failed to parse store response: {0}")]
    Deserialize(String),
    #[error("no concrete index matches any configured pattern: {patterns:?} (tool: {tool})")]
    NoMatchingIndex { patterns: Vec<String>, tool: String },
    #[error("invalid stream cursor")]
    InvalidCursor,
}
