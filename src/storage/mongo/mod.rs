mod schema;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use std::time::Duration;
use tracing::info;

use crate::models::common::StorageConfig;
use crate::models::datasets::transactions::TransactionRecord;
use crate::models::errors::StoreError;
use crate::storage::mongo::schema::{transaction_document, transaction_indexes};
use crate::storage::TransactionStore;

const DUPLICATE_KEY_CODE: i32 = 11000;

pub struct MongoStore {
    database: Database,
    collection: Collection<Document>,
    timeout: Duration,
}

impl MongoStore {
    pub async fn connect(uri: &str, config: &StorageConfig) -> Result<Self, StoreError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let mut options = ClientOptions::parse(uri).await.map_err(backend_error)?;
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);
        let client = Client::with_options(options).map_err(backend_error)?;

        let database = client.database(&config.database);
        let collection = database.collection::<Document>(&config.collection);
        info!(
            "Using MongoDB collection {}.{}",
            config.database, config.collection
        );

        Ok(Self {
            database,
            collection,
            timeout,
        })
    }

    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.collection
            .create_indexes(transaction_indexes())
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MongoStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let document = transaction_document(record);
        match tokio::time::timeout(self.timeout, self.collection.insert_one(document)).await {
            Err(_) => Err(StoreError::Timeout(self.timeout)),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if is_duplicate_key(&e) => Err(StoreError::DuplicateKey {
                id: record.id.clone(),
            }),
            Ok(Err(e)) => Err(backend_error(e)),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match tokio::time::timeout(self.timeout, self.database.run_command(doc! { "ping": 1 }))
            .await
        {
            Err(_) => Err(StoreError::Timeout(self.timeout)),
            Ok(result) => result.map(|_| ()).map_err(backend_error),
        }
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn backend_error(err: MongoError) -> StoreError {
    StoreError::Backend(err.to_string())
}
