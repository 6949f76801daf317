use alloy_primitives::{hex, keccak256, Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::datasets::logs::RawLogRecord;
use crate::models::datasets::transactions::{TransactionRecord, TransactionStatus};
use crate::models::errors::DecodeError;

/// Position of each indexed field within the event's topics.
///
/// The layout is a contract with the emitting contract's event signature. Bump
/// `version` whenever the event changes so stored records can be traced back to
/// the layout that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicLayout {
    pub version: u32,
    pub event_signature: Option<B256>,
    pub customer_topic: usize,
    pub order_id_topic: usize,
    pub amount_topic: usize,
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self {
            version: 1,
            event_signature: None,
            customer_topic: 1,
            order_id_topic: 2,
            amount_topic: 3,
        }
    }
}

impl TopicLayout {
    /// Minimum number of topics a log needs to be decodable. Topic 0 is always
    /// the event signature, so this is never below 1.
    pub fn min_topics(&self) -> usize {
        self.customer_topic
            .max(self.order_id_topic)
            .max(self.amount_topic)
            + 1
    }
}

pub trait TransactionDecoder {
    fn decode_transaction(
        &self,
        layout: &TopicLayout,
        captured_at: DateTime<Utc>,
    ) -> Result<TransactionRecord, DecodeError>;
}

impl TransactionDecoder for RawLogRecord {
    fn decode_transaction(
        &self,
        layout: &TopicLayout,
        captured_at: DateTime<Utc>,
    ) -> Result<TransactionRecord, DecodeError> {
        let required = layout.min_topics();
        if self.topics.len() < required {
            return Err(DecodeError::InsufficientTopics {
                required,
                got: self.topics.len(),
            });
        }

        if let Some(expected) = layout.event_signature {
            let got = self.topics[0];
            if got != expected {
                return Err(DecodeError::SignatureMismatch { expected, got });
            }
        }

        let customer = Address::from_word(self.topics[layout.customer_topic]);

        let order_word = word_to_uint(&self.topics[layout.order_id_topic]);
        let order_id = u64::try_from(order_word)
            .map_err(|_| DecodeError::OrderIdOverflow { value: order_word })?;

        let amount = word_to_uint(&self.topics[layout.amount_topic]);

        Ok(TransactionRecord {
            id: transaction_id(self),
            order_id,
            customer_address: hex::encode_prefixed(customer.as_slice()),
            amount: amount.to_string(),
            timestamp: captured_at,
            status: TransactionStatus::Completed,
            block_number: self.block_number,
            transaction_hash: self.tx_hash.map(|hash| hash.to_string()),
            log_index: self.log_index,
        })
    }
}

pub fn word_to_uint(word: &B256) -> U256 {
    U256::from_be_bytes(word.0)
}

pub fn uint_to_word(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}

/// Deterministic id so the same log delivered twice maps to the same document.
///
/// Uses (tx hash, log index) when the node provides them; otherwise falls back
/// to a hash over the log's content and block number.
pub fn transaction_id(log: &RawLogRecord) -> String {
    match (log.tx_hash, log.log_index) {
        (Some(tx_hash), Some(log_index)) => format!("tx_{}_{}", tx_hash, log_index),
        _ => {
            let mut preimage =
                Vec::with_capacity(20 + log.topics.len() * 32 + log.data.len() + 8);
            preimage.extend_from_slice(log.address.as_slice());
            for topic in &log.topics {
                preimage.extend_from_slice(topic.as_slice());
            }
            preimage.extend_from_slice(&log.data);
            preimage.extend_from_slice(&log.block_number.unwrap_or_default().to_be_bytes());
            format!("tx_{}", keccak256(&preimage))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256, Bytes};

    const SIGNATURE: B256 =
        b256!("0x6a5a7f5a4c8f0b1c7e3c5f0b7b0a8d7c5e4d3c2b1a09f8e7d6c5b4a392817161");
    const CUSTOMER: Address = address!("0x00000000219ab540356cBB839Cbe05303d7705Fa");

    fn log_with(order_id: U256, amount: U256) -> RawLogRecord {
        RawLogRecord::new(
            address!("0x1111111111111111111111111111111111111111"),
            vec![
                SIGNATURE,
                CUSTOMER.into_word(),
                uint_to_word(order_id),
                uint_to_word(amount),
            ],
            Bytes::new(),
        )
    }

    fn random_uint() -> U256 {
        U256::from_limbs([fastrand::u64(..), fastrand::u64(..), fastrand::u64(..), fastrand::u64(..)])
    }

    #[test]
    fn test_decodes_reference_event() {
        let log = log_with(U256::from(1), U256::from(0x64));
        let now = Utc::now();

        let record = log.decode_transaction(&TopicLayout::default(), now).unwrap();

        assert_eq!(record.order_id, 1);
        assert_eq!(record.amount, "100");
        assert_eq!(record.status, TransactionStatus::Completed);
        assert_eq!(record.customer_address, "0x00000000219ab540356cbb839cbe05303d7705fa");
        assert_eq!(record.timestamp, now);
    }

    #[test]
    fn test_too_few_topics_is_undecodable() {
        let full = log_with(U256::from(7), U256::from(9));
        for len in 0..4 {
            let mut log = full.clone();
            log.topics.truncate(len);
            let err = log
                .decode_transaction(&TopicLayout::default(), Utc::now())
                .unwrap_err();
            assert_eq!(err, DecodeError::InsufficientTopics { required: 4, got: len });
        }
    }

    #[test]
    fn test_amount_round_trips_full_range() {
        let layout = TopicLayout::default();
        let mut samples = vec![U256::ZERO, U256::from(1), U256::MAX, U256::from(u64::MAX)];
        samples.extend((0..500).map(|_| random_uint()));

        for amount in samples {
            let record = log_with(U256::from(1), amount)
                .decode_transaction(&layout, Utc::now())
                .unwrap();
            assert_eq!(record.amount.parse::<U256>().unwrap(), amount);
        }
    }

    #[test]
    fn test_order_id_round_trips_u64_range() {
        let layout = TopicLayout::default();
        let mut samples = vec![0, 1, u64::MAX];
        samples.extend((0..500).map(|_| fastrand::u64(..)));

        for order_id in samples {
            let record = log_with(U256::from(order_id), U256::from(1))
                .decode_transaction(&layout, Utc::now())
                .unwrap();
            assert_eq!(record.order_id, order_id);
        }
    }

    #[test]
    fn test_order_id_above_u64_is_undecodable() {
        let value = U256::from(u64::MAX) + U256::from(1);
        let err = log_with(value, U256::from(1))
            .decode_transaction(&TopicLayout::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, DecodeError::OrderIdOverflow { value });
    }

    #[test]
    fn test_signature_mismatch() {
        let layout = TopicLayout {
            event_signature: Some(B256::repeat_byte(0xab)),
            ..Default::default()
        };
        let err = log_with(U256::from(1), U256::from(1))
            .decode_transaction(&layout, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DecodeError::SignatureMismatch { got, .. } if got == SIGNATURE));

        let layout = TopicLayout {
            event_signature: Some(SIGNATURE),
            ..Default::default()
        };
        assert!(log_with(U256::from(1), U256::from(1))
            .decode_transaction(&layout, Utc::now())
            .is_ok());
    }

    #[test]
    fn test_custom_layout_reorders_topics() {
        let layout = TopicLayout {
            version: 2,
            event_signature: None,
            customer_topic: 3,
            order_id_topic: 1,
            amount_topic: 2,
        };
        let log = RawLogRecord::new(
            Address::ZERO,
            vec![
                SIGNATURE,
                uint_to_word(U256::from(42)),
                uint_to_word(U256::from(5000)),
                CUSTOMER.into_word(),
            ],
            Bytes::new(),
        );

        let record = log.decode_transaction(&layout, Utc::now()).unwrap();
        assert_eq!(record.order_id, 42);
        assert_eq!(record.amount, "5000");
        assert_eq!(record.customer_address, hex::encode_prefixed(CUSTOMER.as_slice()));
    }

    #[test]
    fn test_id_uses_tx_hash_and_log_index() {
        let mut log = log_with(U256::from(1), U256::from(1));
        log.tx_hash = Some(B256::repeat_byte(0x01));
        log.log_index = Some(3);

        let record = log.decode_transaction(&TopicLayout::default(), Utc::now()).unwrap();
        assert_eq!(record.id, format!("tx_{}_3", B256::repeat_byte(0x01)));
        assert_eq!(record.log_index, Some(3));
    }

    #[test]
    fn test_fallback_id_is_stable_across_deliveries() {
        let log = log_with(U256::from(1), U256::from(1));
        let first = log.decode_transaction(&TopicLayout::default(), Utc::now()).unwrap();
        let second = log.decode_transaction(&TopicLayout::default(), Utc::now()).unwrap();
        assert_eq!(first.id, second.id);

        let other = log_with(U256::from(2), U256::from(1))
            .decode_transaction(&TopicLayout::default(), Utc::now())
            .unwrap();
        assert_ne!(first.id, other.id);
    }
}
