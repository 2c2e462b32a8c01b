//! CatalogClient: facade that runs operations through quote, confirmation,
//! submission and reconciliation, and keeps the projection in sync with the
//! ledger's notifications.

use std::sync::Arc;

use alloy_primitives::U256;
use catalog_types::{
    encode_text, Address, CatalogItem, CatalogQuery, ContractCall, Delivery, LedgerEvent,
    QueryResponse, Receipt, SendOptions, SubscriptionFilter, Topic,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::engine::{
    transition, EngineEvent, EngineState, OperationKind, OperationRequest, PendingOperation,
};
use crate::error::{EngineError, OperationError};
use crate::fee::{FeeEstimator, Quote};
use crate::gate::{ConfirmationGate, ConfirmationPrompt, Decision};
use crate::messages::{failure_notice, query_failure_notice, success_notice};
use crate::notifier::{Notice, Notifier};
use crate::projection::{ProjectionSnapshot, ProjectionStore, StoreEvent};
use crate::session::{ListenerGuard, Session};
use crate::transport::{EventSink, LedgerTransport, TransportError};

/// How a full `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Submitted(Receipt),
    Declined,
}

/// One-shot consumption listeners of a submitted Consume, kept until both
/// notifications for the content have been folded.
struct ConsumeWatch<T: LedgerTransport + ?Sized> {
    content: Address,
    remaining: Vec<Topic>,
    _listeners: ListenerGuard<T>,
}

/// Holds the engine in a remote stage. Dropped while still armed (the
/// caller's future was cancelled mid-await) it publishes `Idle` again.
struct StageGuard {
    state_tx: Arc<watch::Sender<EngineState>>,
    armed: bool,
}

impl StageGuard {
    fn enter(state_tx: &Arc<watch::Sender<EngineState>>, stage: EngineState) -> Self {
        let previous = state_tx.send_replace(stage);
        debug!(from = ?previous, to = ?stage, "engine transition");
        Self {
            state_tx: Arc::clone(state_tx),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if self.armed {
            let stage = self.state_tx.send_replace(EngineState::Idle);
            warn!(?stage, "operation cancelled mid-flight, engine reset to idle");
        }
    }
}

pub struct CatalogClient<T: LedgerTransport + ?Sized + 'static> {
    transport: Arc<T>,
    estimator: FeeEstimator<T>,
    config: ClientConfig,
    store: ProjectionStore,
    notifier: Arc<dyn Notifier>,
    /// Installed only once a quote is ready; remote stages keep it local.
    pending: Option<PendingOperation>,
    state_tx: Arc<watch::Sender<EngineState>>,
    events_tx: mpsc::UnboundedSender<StoreEvent>,
    events_rx: mpsc::UnboundedReceiver<StoreEvent>,
    session: Option<Session<T>>,
    consume_watches: Vec<ConsumeWatch<T>>,
}

impl<T> CatalogClient<T>
where
    T: LedgerTransport + ?Sized + 'static,
{
    pub fn new(transport: Arc<T>, config: ClientConfig, notifier: Arc<dyn Notifier>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            estimator: FeeEstimator::new(Arc::clone(&transport)),
            transport,
            config,
            store: ProjectionStore::new(),
            notifier,
            pending: None,
            state_tx: Arc::new(state_tx),
            events_tx,
            events_rx,
            session: None,
            consume_watches: Vec::new(),
        }
    }

    /// Opens the session subscriptions and the status poll. Calling it on a
    /// running client is a no-op.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = Session::open(
            Arc::clone(&self.transport),
            self.config.account,
            self.config.poll_interval(),
            self.event_sink(),
        )
        .await?;
        self.session = Some(session);
        Ok(())
    }

    /// Releases every subscription, including pending consumption listeners,
    /// and cancels the poll.
    pub fn stop(&mut self) {
        self.consume_watches.clear();
        if self.session.take().is_some() {
            info!(account = %self.config.account, "session stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn account(&self) -> Address {
        self.config.account
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    /// Receives every state transition, for re-render triggers.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    pub fn store(&self) -> &ProjectionStore {
        &self.store
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        self.store.snapshot()
    }

    pub fn search(&self, term: &str) -> Vec<CatalogItem> {
        self.store.filtered(term)
    }

    pub fn event_sink(&self) -> EventSink {
        EventSink::new(self.events_tx.clone())
    }

    /// Number of consumption listener sets still waiting for delivery.
    pub fn pending_consumptions(&self) -> usize {
        self.consume_watches.len()
    }

    /// Folds every queued event without waiting.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
            applied += 1;
        }
        applied
    }

    /// Waits for the next queued event and folds it. The client keeps a
    /// sender of its own, so on an empty queue this waits until something is
    /// pushed; bound it externally (for example with `tokio::time::timeout`).
    pub async fn process_next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: StoreEvent) {
        if let StoreEvent::Ledger(ledger_event) = &event {
            self.settle_consume_watches(ledger_event);
        }
        if let Some(notice) = self.store.apply(event) {
            self.notify(notice);
        }
    }

    fn settle_consume_watches(&mut self, event: &LedgerEvent) {
        let topic = event.topic();
        if !matches!(topic, Topic::ProvideContent | Topic::CanLeaveFeedback) {
            return;
        }
        let Some(content) = event.content_address() else {
            return;
        };
        for pending in self.consume_watches.iter_mut().filter(|w| w.content == content) {
            pending.remaining.retain(|t| *t != topic);
        }
        self.consume_watches.retain(|w| !w.remaining.is_empty());
    }

    fn notify(&self, notice: Notice) {
        if let Err(err) = self.notifier.notify(&notice) {
            warn!(error = %err, title = %notice.title, "notice dropped");
        }
    }

    pub fn follow_author(&mut self, author: &str) {
        let notice = self.store.follow_author(author);
        self.notify(notice);
    }

    pub fn follow_genre(&mut self, genre: &str) {
        let notice = self.store.follow_genre(genre);
        self.notify(notice);
    }

    async fn fetch<R>(
        &self,
        query: CatalogQuery,
        expected: &'static str,
        extract: impl FnOnce(QueryResponse) -> Option<R>,
    ) -> Result<R, OperationError> {
        let source = match self.transport.call(query.clone(), self.config.account).await {
            Ok(response) => match extract(response) {
                Some(value) => return Ok(value),
                None => TransportError::UnexpectedResponse { expected },
            },
            Err(err) => err,
        };
        let err = OperationError::QueryFailure {
            query: query.method_name(),
            source,
        };
        warn!(error = %err, "query failed");
        self.notify(query_failure_notice(&query, &err));
        Err(err)
    }

    /// Replaces the catalog listing and its author and genre lists.
    pub async fn refresh_catalog(&mut self) -> Result<(), OperationError> {
        let stats = self
            .fetch(CatalogQuery::Statistics, "Statistics", |r| match r {
                QueryResponse::Statistics(stats) => Some(stats),
                _ => None,
            })
            .await?;
        self.apply_event(StoreEvent::CatalogRefreshed(stats));
        Ok(())
    }

    pub async fn refresh_owned(&mut self) -> Result<(), OperationError> {
        let grants = self
            .fetch(CatalogQuery::GrantsAvailable, "Grants", |r| match r {
                QueryResponse::Grants(grants) => Some(grants),
                _ => None,
            })
            .await?;
        self.apply_event(StoreEvent::OwnedRefreshed(grants));
        Ok(())
    }

    pub async fn refresh_feedback(&mut self) -> Result<(), OperationError> {
        let entries = self
            .fetch(CatalogQuery::FeedbackAvailable, "FeedbackAvailable", |r| match r {
                QueryResponse::FeedbackAvailable(entries) => Some(entries),
                _ => None,
            })
            .await?;
        self.apply_event(StoreEvent::FeedbackRefreshed(entries));
        Ok(())
    }

    pub async fn premium_price(&mut self) -> Result<U256, OperationError> {
        self.fetch(CatalogQuery::PremiumPrice, "PremiumPrice", |r| match r {
            QueryResponse::PremiumPrice(price) => Some(price),
            _ => None,
        })
        .await
    }

    fn set_state(&self, next: EngineState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "engine transition");
        }
    }

    /// Surfaces `err` once, clears the slot and returns to `Idle`.
    fn abandon(
        &mut self,
        kind: OperationKind,
        description: Option<String>,
        err: OperationError,
    ) -> EngineError {
        warn!(%kind, error = %err, "operation failed");
        self.notify(failure_notice(kind, description.as_deref(), &err));
        self.pending = None;
        self.set_state(EngineState::Idle);
        EngineError::Operation(err)
    }

    /// Validates the request, prices it and parks the engine waiting for a
    /// decision. Rejected with `Busy` while another operation is outstanding.
    /// Dropping the returned future before it resolves leaves the engine idle.
    pub async fn begin(
        &mut self,
        request: OperationRequest,
    ) -> Result<ConfirmationPrompt, EngineError> {
        let current = self.state();
        if current != EngineState::Idle {
            return Err(EngineError::Busy { state: current });
        }
        let kind = request.kind;
        let description = request.target.as_ref().map(|t| t.description.clone());
        let mut pending = match PendingOperation::from_request(request) {
            Ok(pending) => pending,
            Err(err) => return Err(self.abandon(kind, description, err)),
        };
        let quoting = transition(current, EngineEvent::Begin)?;
        let awaiting = transition(quoting, EngineEvent::QuoteReady)?;
        debug!(%kind, target = ?description, "operation begun");

        let stage = StageGuard::enter(&self.state_tx, quoting);
        let quote = match self.quote_pending(&mut pending).await {
            Ok(quote) => quote,
            Err(err) => {
                stage.disarm();
                let description = pending.description().map(str::to_string).or(description);
                return Err(self.abandon(kind, description, err));
            }
        };
        stage.disarm();
        pending.quote = Some(quote);
        self.pending = Some(pending);
        self.set_state(awaiting);
        Ok(ConfirmationPrompt::from_quote(kind, &quote))
    }

    async fn quote_pending(&mut self, pending: &mut PendingOperation) -> Result<Quote, OperationError> {
        let call = self.prepare_call(pending).await?;
        let quote = self
            .estimator
            .quote(call, self.config.account, pending.payment)
            .await?;
        Ok(quote)
    }

    /// Builds the estimate call. A Consume target without a contract address
    /// is resolved first, at most once per begin.
    async fn prepare_call(
        &mut self,
        pending: &mut PendingOperation,
    ) -> Result<ContractCall, OperationError> {
        let placeholder = self.config.feedback_placeholder;
        let mut resolved = false;
        loop {
            match pending.contract_call(placeholder) {
                Err(OperationError::ResolutionFailure { description, .. })
                    if pending.kind == OperationKind::Consume && !resolved =>
                {
                    resolved = true;
                    let address = self.resolve_address(&description).await?;
                    self.store.set_owned_address(&description, address);
                    if let Some(target) = pending.target.as_mut() {
                        target.address = Some(address);
                    }
                    debug!(%description, %address, "content address resolved");
                }
                other => return other,
            }
        }
    }

    async fn resolve_address(&self, description: &str) -> Result<Address, OperationError> {
        let query = CatalogQuery::ContentAddress {
            content: encode_text(description)?,
        };
        let failure = |reason: String| OperationError::ResolutionFailure {
            description: description.to_string(),
            reason,
        };
        match self.transport.call(query, self.config.account).await {
            Ok(QueryResponse::ContentAddress(Some(address))) if !address.is_zero() => Ok(address),
            Ok(QueryResponse::ContentAddress(_)) => Err(failure("no contract for content".to_string())),
            Ok(_) => Err(failure(
                TransportError::UnexpectedResponse {
                    expected: "ContentAddress",
                }
                .to_string(),
            )),
            Err(err) => Err(failure(err.to_string())),
        }
    }

    /// Drops the pending operation without any remote call.
    pub fn decline(&mut self) -> Result<(), EngineError> {
        let next = transition(self.state(), EngineEvent::Decline)?;
        if let Some(pending) = self.pending.take() {
            debug!(kind = %pending.kind, "operation declined");
        }
        self.set_state(next);
        Ok(())
    }

    /// Submits the quoted operation and reconciles the outcome. Only valid
    /// while awaiting confirmation of an affordable quote. Dropping the
    /// returned future before it resolves leaves the engine idle; whether the
    /// submission reached the ledger is then unknown.
    pub async fn confirm(&mut self) -> Result<Receipt, EngineError> {
        let current = self.state();
        let submitting = transition(current, EngineEvent::Confirm)?;
        let settled = transition(submitting, EngineEvent::Settled)?;
        let quote = match self.pending.as_ref().and_then(|p| p.quote) {
            Some(quote) if quote.is_affordable() => quote,
            _ => return Err(EngineError::AcceptUnavailable),
        };
        let Some(pending) = self.pending.take() else {
            return Err(EngineError::AcceptUnavailable);
        };

        let stage = StageGuard::enter(&self.state_tx, submitting);
        let kind = pending.kind;
        let description = pending.description().map(str::to_string);
        let scores = pending.scores.unwrap_or(self.config.feedback_placeholder);
        let call = match pending.contract_call(scores) {
            Ok(call) => call,
            Err(err) => {
                stage.disarm();
                return Err(self.abandon(kind, description, err));
            }
        };

        let consume_watch = match &call {
            ContractCall::ConsumeContent { content_address } => {
                match self.watch_consumption(*content_address).await {
                    Ok(listeners) => Some(listeners),
                    Err(cause) => {
                        stage.disarm();
                        return Err(self.abandon(
                            kind,
                            description,
                            OperationError::SubmissionFailure { cause },
                        ));
                    }
                }
            }
            _ => None,
        };

        let was_premium = self.store.subscription().is_active;
        let options = SendOptions {
            from: self.config.account,
            fee_units: quote.fee_units,
            fee_rate: quote.fee_rate,
            payment: pending.payment,
        };
        info!(%kind, method = call.method_name(), fee_units = %quote.fee_units, payment = %pending.payment, "submitting");
        let sent = self.transport.send(call, options).await;
        stage.disarm();
        match sent {
            Ok(receipt) => {
                self.reconcile(&pending, was_premium);
                if let Some(listeners) = consume_watch {
                    self.consume_watches.push(listeners);
                }
                info!(%kind, tx_hash = %receipt.tx_hash, "operation settled");
                self.set_state(settled);
                Ok(receipt)
            }
            Err(cause) => {
                drop(consume_watch);
                Err(self.abandon(kind, description, OperationError::SubmissionFailure { cause }))
            }
        }
    }

    async fn watch_consumption(
        &self,
        content: Address,
    ) -> Result<ConsumeWatch<T>, TransportError> {
        let topics = vec![Topic::ProvideContent, Topic::CanLeaveFeedback];
        let mut listeners = ListenerGuard::new(Arc::clone(&self.transport));
        for topic in &topics {
            let filter = SubscriptionFilter::for_content(*topic, self.config.account, content);
            listeners.subscribe(filter, Delivery::Once, self.event_sink()).await?;
        }
        Ok(ConsumeWatch {
            content,
            remaining: topics,
            _listeners: listeners,
        })
    }

    fn reconcile(&mut self, pending: &PendingOperation, was_premium: bool) {
        let description = pending.description();
        match pending.kind {
            OperationKind::BuyPremium => self.store.mark_premium_active(),
            OperationKind::LeaveFeedback => {
                if let Some(description) = description {
                    self.store.remove_feedback(description);
                }
            }
            // Ownership and consumption changes arrive as notifications.
            OperationKind::BuyOwn
            | OperationKind::BuyGift
            | OperationKind::AccessPremium
            | OperationKind::GiftPremium
            | OperationKind::Consume => {}
        }
        if let Some(notice) = success_notice(pending.kind, description, was_premium) {
            self.notify(notice);
        }
    }

    /// Runs one operation end to end through `gate`.
    pub async fn run<G>(
        &mut self,
        request: OperationRequest,
        gate: &mut G,
    ) -> Result<Outcome, EngineError>
    where
        G: ConfirmationGate + ?Sized,
    {
        let prompt = self.begin(request).await?;
        match gate.present(&prompt).await {
            Decision::Accepted => self.confirm().await.map(Outcome::Submitted),
            Decision::Declined => {
                self.decline()?;
                Ok(Outcome::Declined)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use alloy_primitives::U256;
    use async_trait::async_trait;
    use catalog_ledger_mock::{DemoAccounts, DemoScenario, MockLedger};
    use catalog_types::{
        Address, CatalogQuery, ContractCall, Delivery, EstimateOptions, FeedbackEligibleItem,
        FeedbackScores, QueryResponse, Receipt, SendOptions, SubscriptionFilter, SubscriptionId,
        Topic,
    };
    use tokio::time::timeout;

    use super::{CatalogClient, Outcome};
    use crate::config::ClientConfig;
    use crate::engine::{EngineState, OperationRequest};
    use crate::error::{EngineError, OperationError};
    use crate::fee::QuoteStage;
    use crate::gate::{Decision, ScriptedGate};
    use crate::notifier::{Notice, NoticeLevel, Notifier, NotifyError, RecordingNotifier};
    use crate::projection::StoreEvent;
    use crate::transport::{EventSink, LedgerTransport, MockTransport, TransportError};

    struct Harness {
        client: CatalogClient<MockTransport>,
        transport: Arc<MockTransport>,
        notices: RecordingNotifier,
        accounts: DemoAccounts,
    }

    fn harness_for(account: fn(&DemoAccounts) -> Address) -> Harness {
        let scenario = DemoScenario::new();
        let accounts = scenario.accounts;
        let transport = Arc::new(MockTransport::new(scenario.ledger));
        let notices = RecordingNotifier::new();
        let client = CatalogClient::new(
            Arc::clone(&transport),
            ClientConfig::new(account(&accounts)),
            Arc::new(notices.clone()),
        );
        Harness {
            client,
            transport,
            notices,
            accounts,
        }
    }

    fn harness() -> Harness {
        harness_for(|a| a.alice)
    }

    fn sends(h: &Harness) -> usize {
        h.transport.with_ledger(|l| l.submitted.len()).unwrap()
    }

    async fn buy(h: &mut Harness, title: &str) {
        let item = h.client.store().catalog_item(title).unwrap().clone();
        h.client
            .run(OperationRequest::buy(&item), &mut ScriptedGate::accepting())
            .await
            .unwrap();
        h.client.drain_events();
    }

    #[tokio::test]
    async fn each_quote_stage_failure_resets_to_idle() {
        let mut h = harness();
        h.client.refresh_catalog().await.unwrap();
        let item = h.client.store().catalog_item("Solaris").unwrap().clone();

        let cases = [
            (QuoteStage::Estimate, "check if already bought"),
            (QuoteStage::FeeRate, "Could not get gas price"),
            (QuoteStage::Balance, "Could not get balance"),
        ];
        for (stage, text) in cases {
            h.transport
                .with_ledger(|l| {
                    l.faults = Default::default();
                    match stage {
                        QuoteStage::Estimate => l.faults.fail_estimate = true,
                        QuoteStage::FeeRate => l.faults.fail_fee_rate = true,
                        QuoteStage::Balance => l.faults.fail_balance = true,
                    }
                })
                .unwrap();
            h.notices.clear();

            let err = h.client.begin(OperationRequest::buy(&item)).await.unwrap_err();
            match err {
                EngineError::Operation(OperationError::QuoteFailure(failure)) => {
                    assert_eq!(failure.stage, stage)
                }
                other => panic!("unexpected error {other:?}"),
            }
            assert_eq!(h.client.state(), EngineState::Idle);
            assert!(h.client.pending().is_none());
            assert_eq!(h.notices.notices().len(), 1);
            assert!(h.notices.messages()[0].contains(text));
        }
        assert_eq!(sends(&h), 0);
    }

    #[tokio::test]
    async fn decline_never_submits() {
        let mut h = harness();
        h.client.refresh_catalog().await.unwrap();
        let item = h.client.store().catalog_item("Blade Runner").unwrap().clone();

        let prompt = h.client.begin(OperationRequest::buy(&item)).await.unwrap();
        assert!(prompt.accept_enabled);
        assert_eq!(h.client.state(), EngineState::AwaitingConfirmation);
        assert!(h.client.pending().unwrap().quote.is_some());

        h.client.decline().unwrap();
        assert_eq!(h.client.state(), EngineState::Idle);
        assert!(h.client.pending().is_none());
        assert_eq!(sends(&h), 0);
    }

    #[tokio::test]
    async fn unaffordable_quote_blocks_accept() {
        let mut ledger = MockLedger::new(U256::from(1u64), U256::from(1_000u64));
        ledger.publish_content("Cheap", "Pulp", "Anon", U256::from(100u64)).unwrap();
        ledger.set_fee_units(U256::from(10u64));
        let alice = Address::new([0x01; 20]);
        ledger.set_balance(alice, U256::from(50u64));
        let transport = Arc::new(MockTransport::new(ledger));
        let mut client = CatalogClient::new(
            Arc::clone(&transport),
            ClientConfig::new(alice),
            Arc::new(RecordingNotifier::new()),
        );
        client.refresh_catalog().await.unwrap();
        let item = client.store().catalog_item("Cheap").unwrap().clone();

        let prompt = client.begin(OperationRequest::buy(&item)).await.unwrap();
        assert!(!prompt.accept_enabled);
        assert_eq!(client.confirm().await.unwrap_err(), EngineError::AcceptUnavailable);
        assert_eq!(client.state(), EngineState::AwaitingConfirmation);
        client.decline().unwrap();

        let mut gate = ScriptedGate::accepting();
        let outcome = client.run(OperationRequest::buy(&item), &mut gate).await.unwrap();
        assert_eq!(outcome, Outcome::Declined);
        assert_eq!(client.state(), EngineState::Idle);
        assert!(transport.with_ledger(|l| l.submitted.is_empty()).unwrap());
    }

    #[tokio::test]
    async fn second_begin_is_rejected_while_outstanding() {
        let mut h = harness();
        h.client.refresh_catalog().await.unwrap();
        let first = h.client.store().catalog_item("Solaris").unwrap().clone();
        let second = h.client.store().catalog_item("Kind of Blue").unwrap().clone();

        h.client.begin(OperationRequest::buy(&first)).await.unwrap();
        let err = h.client.begin(OperationRequest::buy(&second)).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::Busy {
                state: EngineState::AwaitingConfirmation
            }
        );
        assert!(err.is_contract_violation());
        assert_eq!(h.client.pending().unwrap().description(), Some("Solaris"));
    }

    #[tokio::test]
    async fn confirm_and_decline_from_idle_are_contract_violations() {
        let mut h = harness();
        assert!(matches!(
            h.client.confirm().await,
            Err(EngineError::InvalidTransition(_))
        ));
        assert!(matches!(h.client.decline(), Err(EngineError::InvalidTransition(_))));
        assert!(h.notices.notices().is_empty());
    }

    #[tokio::test]
    async fn missing_target_is_reported_once() {
        let mut h = harness();
        let request = OperationRequest::new(crate::engine::OperationKind::BuyOwn);
        let err = h.client.begin(request).await.unwrap_err();
        assert_eq!(err.operation(), Some(&OperationError::NoTargetSelected));
        assert_eq!(h.notices.messages(), vec!["No selected content".to_string()]);
        assert_eq!(h.client.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn purchase_learns_ownership_from_notification() {
        let mut h = harness();
        h.client.start().await.unwrap();
        h.client.refresh_catalog().await.unwrap();
        buy(&mut h, "Solaris").await;

        let owned = h.client.store().owned_item("Solaris").unwrap();
        assert!(owned.resolved_address.is_some());
        assert_eq!(
            h.client.store().catalog_item("Solaris").unwrap().resolved_address,
            owned.resolved_address
        );
        assert!(h.notices.messages().iter().any(|m| m == "Obtained access to \"Solaris\"!"));
        assert_eq!(h.client.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn submission_failure_notifies_and_resets() {
        let mut h = harness();
        h.client.refresh_catalog().await.unwrap();
        let item = h.client.store().catalog_item("Solaris").unwrap().clone();
        h.client.begin(OperationRequest::buy(&item)).await.unwrap();
        h.transport.with_ledger(|l| l.faults.fail_send = true).unwrap();

        let err = h.client.confirm().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Operation(OperationError::SubmissionFailure { .. })
        ));
        assert_eq!(h.client.state(), EngineState::Idle);
        assert!(h.client.pending().is_none());
        assert_eq!(h.notices.messages(), vec!["Could not complete purchase".to_string()]);
    }

    #[tokio::test]
    async fn premium_for_self_activates_but_gift_does_not() {
        let mut h = harness();
        let price = h.client.premium_price().await.unwrap();
        let bob = h.accounts.bob;

        let outcome = h
            .client
            .run(OperationRequest::gift_premium(price, bob), &mut ScriptedGate::accepting())
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Submitted(_)));
        assert!(!h.client.store().subscription().is_active);
        assert!(h.transport.with_ledger(|l| l.is_premium(bob)).unwrap());
        assert!(h
            .notices
            .messages()
            .contains(&"Gifted a premium subscription to the other user".to_string()));

        h.client
            .run(OperationRequest::buy_premium(price), &mut ScriptedGate::accepting())
            .await
            .unwrap();
        assert!(h.client.store().subscription().is_active);
        assert!(h
            .notices
            .messages()
            .contains(&"You bought a Premium subscription!".to_string()));

        h.client
            .run(OperationRequest::buy_premium(price), &mut ScriptedGate::accepting())
            .await
            .unwrap();
        assert!(h
            .notices
            .messages()
            .contains(&"You extended your Premium subscription!".to_string()));
    }

    #[tokio::test]
    async fn premium_access_requires_subscription_and_pays_nothing() {
        let mut h = harness();
        h.client.refresh_catalog().await.unwrap();
        let item = h.client.store().catalog_item("Blade Runner").unwrap().clone();

        let err = h
            .client
            .begin(OperationRequest::access_premium(&item))
            .await
            .unwrap_err();
        assert!(err.operation().is_some());
        assert!(h.notices.messages()[0].contains("check if you have a subscription"));

        let alice = h.accounts.alice;
        h.transport.with_ledger(|l| l.set_premium(alice, true)).unwrap();
        let before = h.transport.with_ledger(|l| l.balance_of(alice)).unwrap();
        let prompt = h.client.begin(OperationRequest::access_premium(&item)).await.unwrap();
        let receipt = h.client.confirm().await.unwrap();
        let after = h.transport.with_ledger(|l| l.balance_of(alice)).unwrap();
        assert_eq!(before - after, prompt.fee_units * U256::from(1_000_000_000u64));
        assert_eq!(receipt.fee_units_used, prompt.fee_units);
    }

    #[tokio::test]
    async fn consume_resolves_address_once_then_folds_notifications() {
        let mut h = harness();
        let alice = h.accounts.alice;
        h.transport.with_ledger(|l| l.grant_access(alice, "Solaris")).unwrap();
        h.client.refresh_owned().await.unwrap();
        let owned = h.client.store().owned_item("Solaris").unwrap().clone();
        assert!(owned.resolved_address.is_none());

        h.client.begin(OperationRequest::consume(&owned)).await.unwrap();
        assert_eq!(h.transport.with_ledger(|l| l.address_lookups).unwrap(), 1);
        let resolved = h.client.store().owned_item("Solaris").unwrap().resolved_address;
        assert!(resolved.is_some());
        assert_eq!(
            h.client.pending().unwrap().target.as_ref().unwrap().address,
            resolved
        );

        h.client.confirm().await.unwrap();
        assert!(h.notices.messages().contains(&"Request for access sent".to_string()));
        h.client.drain_events();
        assert!(h.client.store().owned_item("Solaris").is_none());
        assert_eq!(h.client.store().feedback_item("Solaris").unwrap().address, resolved.unwrap());
        assert_eq!(h.client.pending_consumptions(), 0);
        assert_eq!(
            h.transport.with_ledger(|l| l.listener_count(Topic::ProvideContent)).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn unresolvable_consume_target_fails_without_recursion() {
        let mut h = harness();
        let alice = h.accounts.alice;
        h.transport
            .with_ledger(|l| {
                l.grant_access(alice, "Solaris");
                l.faults.unresolvable_addresses = true;
            })
            .unwrap();
        h.client.refresh_owned().await.unwrap();
        h.notices.clear();
        let owned = h.client.store().owned_item("Solaris").unwrap().clone();

        let err = h.client.begin(OperationRequest::consume(&owned)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Operation(OperationError::ResolutionFailure { .. })
        ));
        assert_eq!(h.transport.with_ledger(|l| l.address_lookups).unwrap(), 1);
        assert_eq!(h.notices.messages(), vec!["Could not get Content's address".to_string()]);
        assert_eq!(h.client.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn content_provided_after_send_resolves_still_folds() {
        let mut h = harness();
        h.client.start().await.unwrap();
        h.client.refresh_catalog().await.unwrap();
        buy(&mut h, "Kind of Blue").await;
        let owned = h.client.store().owned_item("Kind of Blue").unwrap().clone();

        h.transport.with_ledger(|l| l.faults.hold_consume_events = true).unwrap();
        h.client
            .run(OperationRequest::consume(&owned), &mut ScriptedGate::accepting())
            .await
            .unwrap();
        h.client.drain_events();
        assert!(h.client.store().owned_item("Kind of Blue").is_some());
        assert_eq!(h.client.pending_consumptions(), 1);

        assert_eq!(h.transport.with_ledger(|l| l.release_held_events()).unwrap(), 2);
        h.client.drain_events();
        assert!(h.client.store().owned_item("Kind of Blue").is_none());
        assert!(h.client.store().feedback_item("Kind of Blue").is_some());
        assert_eq!(h.client.pending_consumptions(), 0);
    }

    #[tokio::test]
    async fn failed_consume_releases_one_shot_listeners() {
        let mut h = harness();
        let alice = h.accounts.alice;
        h.transport.with_ledger(|l| l.grant_access(alice, "Solaris")).unwrap();
        h.client.refresh_owned().await.unwrap();
        let owned = h.client.store().owned_item("Solaris").unwrap().clone();

        h.client.begin(OperationRequest::consume(&owned)).await.unwrap();
        h.transport.with_ledger(|l| l.faults.fail_send = true).unwrap();
        h.client.confirm().await.unwrap_err();

        let listeners = h
            .transport
            .with_ledger(|l| l.listener_count(Topic::ProvideContent) + l.listener_count(Topic::CanLeaveFeedback))
            .unwrap();
        assert_eq!(listeners, 0);
        assert_eq!(h.client.pending_consumptions(), 0);
        assert!(h.notices.messages().iter().any(|m| m.starts_with("Request for access denied")));
    }

    #[tokio::test]
    async fn leave_feedback_removes_target_and_reindexes() {
        let mut h = harness();
        let alice = h.accounts.alice;
        h.client.refresh_catalog().await.unwrap();
        for title in ["Blade Runner", "Kind of Blue", "Solaris"] {
            h.transport.with_ledger(|l| l.grant_access(alice, title)).unwrap();
        }
        h.client.refresh_owned().await.unwrap();
        for title in ["Blade Runner", "Kind of Blue", "Solaris"] {
            let owned = h.client.store().owned_item(title).unwrap().clone();
            h.client
                .run(OperationRequest::consume(&owned), &mut ScriptedGate::accepting())
                .await
                .unwrap();
            h.client.drain_events();
        }
        assert_eq!(h.client.store().feedback().len(), 3);

        let target = h.client.store().feedback_item("Kind of Blue").unwrap().clone();
        let scores = FeedbackScores::new(4, 3, 5);
        h.client
            .run(OperationRequest::leave_feedback(&target, scores), &mut ScriptedGate::accepting())
            .await
            .unwrap();

        let remaining: Vec<_> = h
            .client
            .store()
            .feedback()
            .iter()
            .map(|i| (i.index, i.description.clone()))
            .collect();
        assert_eq!(
            remaining,
            vec![(0, "Blade Runner".to_string()), (1, "Solaris".to_string())]
        );
        let log = h.transport.with_ledger(|l| l.feedback_log.clone()).unwrap();
        assert_eq!(log, vec![(alice, "Kind of Blue".to_string(), scores)]);
        assert!(h
            .notices
            .messages()
            .contains(&"Left feedback for content Kind of Blue".to_string()));
    }

    #[tokio::test]
    async fn insufficient_balance_declines_through_gate() {
        let mut h = harness_for(|a| a.carol);
        h.client.refresh_catalog().await.unwrap();
        let item = h.client.store().catalog_item("Kind of Blue").unwrap().clone();

        let mut gate = ScriptedGate::new([Decision::Accepted]);
        let outcome = h.client.run(OperationRequest::buy(&item), &mut gate).await.unwrap();
        assert_eq!(outcome, Outcome::Declined);
        assert_eq!(gate.seen()[0].title, "Insufficient funds");
        assert_eq!(sends(&h), 0);
    }

    #[tokio::test]
    async fn state_watch_sees_transitions() {
        let mut h = harness();
        h.client.refresh_catalog().await.unwrap();
        let item = h.client.store().catalog_item("Solaris").unwrap().clone();
        let mut states = h.client.subscribe_state();

        h.client.begin(OperationRequest::buy(&item)).await.unwrap();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), EngineState::AwaitingConfirmation);
        h.client.confirm().await.unwrap();
        assert_eq!(*states.borrow_and_update(), EngineState::Idle);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_collection() {
        let mut h = harness();
        h.client.refresh_catalog().await.unwrap();
        h.transport.with_ledger(|l| l.faults.fail_queries = true).unwrap();
        h.notices.clear();

        assert!(matches!(
            h.client.refresh_catalog().await,
            Err(OperationError::QueryFailure { query: "getStatistics", .. })
        ));
        assert_eq!(h.client.store().catalog().len(), 3);
        assert_eq!(h.notices.messages(), vec!["Couldn't fetch Catalog content".to_string()]);
        assert!(h.client.refresh_feedback().await.is_err());
        assert!(h.client.premium_price().await.is_err());
        assert_eq!(h.notices.count(NoticeLevel::Error), 3);
    }

    struct BrokenNotifier;

    impl Notifier for BrokenNotifier {
        fn notify(&self, _notice: &Notice) -> Result<(), NotifyError> {
            Err(NotifyError("display gone".to_string()))
        }
    }

    #[tokio::test]
    async fn folds_do_not_depend_on_notifier() {
        let scenario = DemoScenario::new();
        let alice = scenario.accounts.alice;
        let transport = Arc::new(MockTransport::new(scenario.ledger));
        let mut client = CatalogClient::new(
            Arc::clone(&transport),
            ClientConfig::new(alice),
            Arc::new(BrokenNotifier),
        );
        client.start().await.unwrap();
        client.follow_author("Scott");
        transport
            .with_ledger(|l| l.publish_content("Alien", "SciFi", "Scott", U256::from(1u64)))
            .unwrap()
            .unwrap();
        client.drain_events();
        assert!(client.store().catalog_item("Alien").is_some());

        client.stop();
        assert!(!client.is_running());
        transport
            .with_ledger(|l| l.publish_content("Heat", "Crime", "Mann", U256::from(1u64)))
            .unwrap()
            .unwrap();
        client.drain_events();
        assert!(client.store().catalog_item("Heat").is_none());
    }

    /// Delegates to the mock; estimates and sends can be made to never resolve.
    struct StallingTransport {
        inner: MockTransport,
        stall_estimate: AtomicBool,
        stall_send: AtomicBool,
    }

    #[async_trait]
    impl LedgerTransport for StallingTransport {
        async fn call(&self, query: CatalogQuery, from: Address) -> Result<QueryResponse, TransportError> {
            self.inner.call(query, from).await
        }

        async fn send(&self, call: ContractCall, options: SendOptions) -> Result<Receipt, TransportError> {
            if self.stall_send.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.send(call, options).await
        }

        async fn estimate_fee(
            &self,
            call: ContractCall,
            options: EstimateOptions,
        ) -> Result<U256, TransportError> {
            if self.stall_estimate.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.estimate_fee(call, options).await
        }

        async fn fee_rate(&self) -> Result<U256, TransportError> {
            self.inner.fee_rate().await
        }

        async fn balance(&self, address: Address) -> Result<U256, TransportError> {
            self.inner.balance(address).await
        }

        async fn subscribe(
            &self,
            filter: SubscriptionFilter,
            delivery: Delivery,
            sink: EventSink,
        ) -> Result<SubscriptionId, TransportError> {
            self.inner.subscribe(filter, delivery, sink).await
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.inner.unsubscribe(id)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_begin_and_confirm_leave_engine_idle() {
        let scenario = DemoScenario::new();
        let alice = scenario.accounts.alice;
        let inner = MockTransport::new(scenario.ledger);
        let transport = Arc::new(StallingTransport {
            inner: inner.clone(),
            stall_estimate: AtomicBool::new(true),
            stall_send: AtomicBool::new(false),
        });
        let notices = RecordingNotifier::new();
        let mut client = CatalogClient::new(
            Arc::clone(&transport),
            ClientConfig::new(alice),
            Arc::new(notices.clone()),
        );
        let mut states = client.subscribe_state();
        client.refresh_catalog().await.unwrap();
        let item = client.store().catalog_item("Solaris").unwrap().clone();

        let elapsed = timeout(Duration::from_millis(20), client.begin(OperationRequest::buy(&item))).await;
        assert!(elapsed.is_err());
        assert_eq!(client.state(), EngineState::Idle);
        assert!(client.pending().is_none());
        assert_eq!(*states.borrow_and_update(), EngineState::Idle);
        assert!(matches!(
            client.decline(),
            Err(EngineError::InvalidTransition(_))
        ));

        transport.stall_estimate.store(false, Ordering::SeqCst);
        transport.stall_send.store(true, Ordering::SeqCst);
        client.begin(OperationRequest::buy(&item)).await.unwrap();
        let elapsed = timeout(Duration::from_millis(20), client.confirm()).await;
        assert!(elapsed.is_err());
        assert_eq!(client.state(), EngineState::Idle);
        assert!(client.pending().is_none());
        assert_eq!(*states.borrow_and_update(), EngineState::Idle);

        transport.stall_send.store(false, Ordering::SeqCst);
        let outcome = client
            .run(OperationRequest::buy(&item), &mut ScriptedGate::accepting())
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Submitted(_)));
        assert_eq!(inner.with_ledger(|l| l.submitted.len()).unwrap(), 1);
        assert_eq!(notices.count(NoticeLevel::Error), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_consume_releases_its_listeners() {
        let scenario = DemoScenario::new();
        let alice = scenario.accounts.alice;
        let inner = MockTransport::new(scenario.ledger);
        let transport = Arc::new(StallingTransport {
            inner: inner.clone(),
            stall_estimate: AtomicBool::new(false),
            stall_send: AtomicBool::new(false),
        });
        let mut client = CatalogClient::new(
            Arc::clone(&transport),
            ClientConfig::new(alice),
            Arc::new(RecordingNotifier::new()),
        );
        client.refresh_catalog().await.unwrap();
        let item = client.store().catalog_item("Solaris").unwrap().clone();
        client
            .run(OperationRequest::buy(&item), &mut ScriptedGate::accepting())
            .await
            .unwrap();
        client.refresh_owned().await.unwrap();
        let owned = client.store().owned_item("Solaris").unwrap().clone();

        transport.stall_send.store(true, Ordering::SeqCst);
        client.begin(OperationRequest::consume(&owned)).await.unwrap();
        assert!(timeout(Duration::from_millis(20), client.confirm()).await.is_err());

        let listening = inner
            .with_ledger(|l| l.listener_count(Topic::ProvideContent) + l.listener_count(Topic::CanLeaveFeedback))
            .unwrap();
        assert_eq!(listening, 0);
        assert_eq!(client.pending_consumptions(), 0);
        assert_eq!(client.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn out_of_range_feedback_scores_never_reach_the_ledger() {
        let mut h = harness();
        let eligible = FeedbackEligibleItem {
            index: 0,
            description: "Solaris".to_string(),
            address: Address::new([0x09; 20]),
        };
        let request = OperationRequest::leave_feedback(&eligible, FeedbackScores::new(6, 0, 3));

        let err = h.client.begin(request).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Operation(OperationError::InvalidScores { .. })
        ));
        assert_eq!(h.client.state(), EngineState::Idle);
        assert_eq!(
            h.notices.messages(),
            vec!["Feedback scores must be between 1 and 5".to_string()]
        );
        assert_eq!(sends(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn next_event_waits_on_empty_queue() {
        let mut h = harness();
        assert!(timeout(Duration::from_secs(60), h.client.process_next_event())
            .await
            .is_err());

        h.client.event_sink().push(StoreEvent::SubscriptionPolled(true));
        h.client.process_next_event().await;
        assert!(h.client.store().subscription().is_active);
    }
}
