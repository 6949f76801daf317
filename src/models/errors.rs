use alloy_primitives::{B256, U256};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Listener is already running")]
    AlreadyListening,
    #[error("Listener is not running")]
    NotListening,
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Subscription error: {0}")]
    Subscription(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Insufficient topics: expected at least {required}, got {got}")]
    InsufficientTopics { required: usize, got: usize },
    #[error("Event signature mismatch: expected {expected}, got {got}")]
    SignatureMismatch { expected: B256, got: B256 },
    #[error("Order id does not fit in 64 bits: {value}")]
    OrderIdOverflow { value: U256 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Duplicate key: {id}")]
    DuplicateKey { id: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}
