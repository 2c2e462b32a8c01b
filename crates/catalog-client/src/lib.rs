//! Catalog client library.
//!
//! This crate exposes:
//! - the ledger transport abstraction (`LedgerTransport`) and an in-memory adapter (`MockTransport`),
//! - fee quoting (`FeeEstimator`) and the confirmation gate (`ConfirmationGate`),
//! - the operation state machine and pending-operation slot (`engine`),
//! - the event projection store (`ProjectionStore`) fed through a message queue,
//! - session lifecycle for long-lived subscriptions and the status poll (`Session`),
//! - the high-level facade (`CatalogClient`) tying them together.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod fee;
pub mod gate;
pub mod messages;
pub mod notifier;
pub mod projection;
pub mod session;
pub mod transport;

pub use client::{CatalogClient, Outcome};
pub use config::ClientConfig;
pub use engine::{
    transition, EngineEvent, EngineState, OperationKind, OperationRequest, PendingOperation,
    TargetRef, TransitionError,
};
pub use error::{EngineError, OperationError};
pub use fee::{FeeEstimator, Quote, QuoteFailure, QuoteStage};
pub use gate::{
    ChannelGate, ConfirmationGate, ConfirmationPrompt, Decision, PromptRequest, ScriptedGate,
};
pub use notifier::{Notice, NoticeLevel, Notifier, NotifyError, RecordingNotifier, TracingNotifier};
pub use projection::{ProjectionSnapshot, ProjectionStore, StoreEvent};
pub use session::{ListenerGuard, Session};
pub use transport::{EventSink, LedgerTransport, MockTransport, TransportError};
