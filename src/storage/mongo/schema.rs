use mongodb::IndexModel;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};

use crate::models::datasets::transactions::TransactionRecord;

// BSON has no unsigned 64-bit integer
fn u64_to_bson(value: u64) -> Bson {
    match i64::try_from(value) {
        Ok(value) => Bson::Int64(value),
        Err(_) => Bson::String(value.to_string()),
    }
}

pub fn transaction_document(record: &TransactionRecord) -> Document {
    let mut document = doc! {
        "_id": record.id.as_str(),
        "orderId": u64_to_bson(record.order_id),
        "customerAddress": record.customer_address.as_str(),
        "amount": record.amount.as_str(),
        "timestamp": BsonDateTime::from_millis(record.timestamp.timestamp_millis()),
        "status": record.status.as_str(),
    };

    if let Some(block_number) = record.block_number {
        document.insert("blockNumber", u64_to_bson(block_number));
    }
    if let Some(transaction_hash) = &record.transaction_hash {
        document.insert("transactionHash", transaction_hash.as_str());
    }
    if let Some(log_index) = record.log_index {
        document.insert("logIndex", u64_to_bson(log_index));
    }

    document
}

/// Secondary indexes for order status lookups. Uniqueness is carried by `_id`.
pub fn transaction_indexes() -> Vec<IndexModel> {
    vec![
        IndexModel::builder().keys(doc! { "orderId": 1 }).build(),
        IndexModel::builder()
            .keys(doc! { "customerAddress": 1, "timestamp": -1 })
            .build(),
    ]
}
