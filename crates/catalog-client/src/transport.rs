use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use async_trait::async_trait;
use catalog_ledger_mock::{MockLedger, Rejection};
use catalog_types::{
    Address, CatalogQuery, ContractCall, Delivery, EstimateOptions, LedgerEvent, QueryResponse,
    Receipt, SendOptions, SubscriptionFilter, SubscriptionId,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::projection::StoreEvent;

/// Error model for calls against the ledger node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("call rejected: code={code}, message={message}")]
    Rejected { code: String, message: String },
    #[error("unexpected response, expected {expected}")]
    UnexpectedResponse { expected: &'static str },
    #[error("internal transport error: {0}")]
    Internal(String),
}

impl From<Rejection> for TransportError {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected {
            code: format!("{:?}", rejection.code),
            message: rejection.message,
        }
    }
}

/// Where subscribed notifications are delivered. Events become immutable
/// `StoreEvent`s on the client's queue; nothing is folded at delivery time.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StoreEvent>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the receiving side is gone.
    pub fn deliver(&self, event: LedgerEvent) -> bool {
        self.push(StoreEvent::Ledger(event))
    }

    pub fn push(&self, event: StoreEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// The RPC surface of the catalog service: read-only `call`, state-changing
/// `send`, cost queries and topic subscriptions.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn call(&self, query: CatalogQuery, from: Address) -> Result<QueryResponse, TransportError>;

    async fn send(&self, call: ContractCall, options: SendOptions)
        -> Result<Receipt, TransportError>;

    async fn estimate_fee(
        &self,
        call: ContractCall,
        options: EstimateOptions,
    ) -> Result<U256, TransportError>;

    async fn fee_rate(&self) -> Result<U256, TransportError>;

    async fn balance(&self, address: Address) -> Result<U256, TransportError>;

    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        delivery: Delivery,
        sink: EventSink,
    ) -> Result<SubscriptionId, TransportError>;

    /// Fire-and-forget; unknown or already-fired ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-memory transport backed by `MockLedger`, used by tests and the demo.
#[derive(Clone)]
pub struct MockTransport {
    ledger: Arc<Mutex<MockLedger>>,
}

impl MockTransport {
    pub fn new(ledger: MockLedger) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
        }
    }

    pub fn with_ledger<R>(
        &self,
        f: impl FnOnce(&mut MockLedger) -> R,
    ) -> Result<R, TransportError> {
        let mut lock = self
            .ledger
            .lock()
            .map_err(|_| TransportError::Unavailable("mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }
}

#[async_trait]
impl LedgerTransport for MockTransport {
    async fn call(&self, query: CatalogQuery, from: Address) -> Result<QueryResponse, TransportError> {
        self.with_ledger(|ledger| ledger.call(from, &query))?.map_err(Into::into)
    }

    async fn send(
        &self,
        call: ContractCall,
        options: SendOptions,
    ) -> Result<Receipt, TransportError> {
        self.with_ledger(|ledger| ledger.send(&call, options))?.map_err(Into::into)
    }

    async fn estimate_fee(
        &self,
        call: ContractCall,
        options: EstimateOptions,
    ) -> Result<U256, TransportError> {
        self.with_ledger(|ledger| ledger.estimate_fee(&call, options))?.map_err(Into::into)
    }

    async fn fee_rate(&self) -> Result<U256, TransportError> {
        self.with_ledger(|ledger| ledger.fee_rate())?.map_err(Into::into)
    }

    async fn balance(&self, address: Address) -> Result<U256, TransportError> {
        self.with_ledger(|ledger| ledger.balance(address))?.map_err(Into::into)
    }

    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        delivery: Delivery,
        sink: EventSink,
    ) -> Result<SubscriptionId, TransportError> {
        self.with_ledger(|ledger| {
            ledger.subscribe(filter, delivery, Box::new(move |event| sink.deliver(event)))
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.with_ledger(|ledger| ledger.unsubscribe(id));
    }
}
