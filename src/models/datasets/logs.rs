use alloy_primitives::{Address, Bytes, FixedBytes};
use alloy_rpc_types_eth::Log;

/// A log record as delivered by the subscription, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogRecord {
    pub address: Address,
    pub topics: Vec<FixedBytes<32>>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub block_hash: Option<FixedBytes<32>>,
    pub tx_hash: Option<FixedBytes<32>>,
    pub log_index: Option<u64>,
    // Set by the node when a reorg drops the log from the canonical chain
    pub removed: bool,
}

impl RawLogRecord {
    pub fn new(address: Address, topics: Vec<FixedBytes<32>>, data: Bytes) -> Self {
        Self {
            address,
            topics,
            data,
            block_number: None,
            block_hash: None,
            tx_hash: None,
            log_index: None,
            removed: false,
        }
    }
}

impl From<Log> for RawLogRecord {
    fn from(log: Log) -> Self {
        Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number,
            block_hash: log.block_hash,
            tx_hash: log.transaction_hash,
            log_index: log.log_index,
            removed: log.removed,
        }
    }
}
