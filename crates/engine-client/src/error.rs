//! Engine client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] jsonrpsee::core::ClientError),
}

pub type Result<T> = std::result::Result<T, EngineClientError>;
