use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy_rpc_types_eth::{Filter, Log};
use alloy_transport::TransportError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};
use url::Url;

use crate::models::datasets::logs::RawLogRecord;
use crate::models::errors::ListenerError;
use crate::utils::strip_html;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Log(RawLogRecord),
    // The stream is dead; no further events will arrive on this handle
    Terminated(String),
}

/// A live log subscription.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> SourceEvent;

    /// Best-effort teardown. Must not fail.
    async fn close(&mut self);
}

/// Opens subscriptions. Each successful `open` yields an independent stream.
#[async_trait]
pub trait EventSourceFactory: Send + Sync {
    async fn open(
        &self,
        endpoint: &Url,
        contract: Address,
    ) -> Result<Box<dyn EventSource>, ListenerError>;
}

/// Endpoint and contract as supplied by configuration, validated on every start.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    pub endpoint: Option<String>,
    pub contract_address: Option<String>,
}

impl SourceSettings {
    pub fn resolve(&self) -> Result<(Url, Address), ListenerError> {
        let endpoint = non_empty(&self.endpoint).ok_or_else(|| {
            ListenerError::Connection("streaming endpoint is not configured".to_string())
        })?;
        let url: Url = endpoint.parse().map_err(|e| {
            ListenerError::Connection(format!("invalid streaming endpoint '{}': {}", endpoint, e))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ListenerError::Connection(format!(
                "unsupported endpoint scheme '{}', expected ws or wss",
                url.scheme()
            )));
        }

        let contract = non_empty(&self.contract_address).ok_or_else(|| {
            ListenerError::Connection("contract address is not configured".to_string())
        })?;
        let contract: Address = contract.parse().map_err(|e| {
            ListenerError::Connection(format!("invalid contract address '{}': {}", contract, e))
        })?;

        Ok((url, contract))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

/// Subscribes to `eth_subscribe("logs")` over a WebSocket connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsEventSourceFactory;

#[async_trait]
impl EventSourceFactory for WsEventSourceFactory {
    async fn open(
        &self,
        endpoint: &Url,
        contract: Address,
    ) -> Result<Box<dyn EventSource>, ListenerError> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(endpoint.as_str()))
            .await
            .map_err(|e| connection_error("failed to connect to the Ethereum client", e))?
            .erased();

        let filter = Filter::new().address(contract);
        let subscription = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| connection_error("failed to subscribe to contract events", e))?;

        info!("Successfully connected to contract at: {}", contract);

        Ok(Box::new(WsEventSource {
            provider: Some(provider),
            logs: Some(subscription.into_stream().boxed()),
        }))
    }
}

fn connection_error(context: &str, err: TransportError) -> ListenerError {
    ListenerError::Connection(format!("{}: {}", context, strip_html(&err.to_string())))
}

pub struct WsEventSource {
    // Keeps the WebSocket backend alive for as long as the stream is read
    provider: Option<DynProvider>,
    logs: Option<BoxStream<'static, Log>>,
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn next_event(&mut self) -> SourceEvent {
        let Some(logs) = self.logs.as_mut() else {
            return SourceEvent::Terminated("subscription already closed".to_string());
        };
        match logs.next().await {
            Some(log) => SourceEvent::Log(RawLogRecord::from(log)),
            None => SourceEvent::Terminated("log subscription stream ended".to_string()),
        }
    }

    async fn close(&mut self) {
        // Dropping the last provider handle shuts down the WebSocket backend
        self.logs.take();
        if self.provider.take().is_some() {
            debug!("Closed WebSocket log subscription");
        }
    }
}
