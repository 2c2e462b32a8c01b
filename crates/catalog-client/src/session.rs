//! Session lifecycle: long-lived topic subscriptions and the subscription
//! status poll, acquired together on start and released together on drop.

use std::sync::Arc;
use std::time::Duration;

use catalog_types::{
    Address, CatalogQuery, Delivery, QueryResponse, SubscriptionFilter, SubscriptionId, Topic,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::projection::StoreEvent;
use crate::transport::{EventSink, LedgerTransport, TransportError};

/// Owns subscription ids and unsubscribes all of them when dropped.
pub struct ListenerGuard<T: LedgerTransport + ?Sized> {
    transport: Arc<T>,
    ids: Vec<SubscriptionId>,
}

impl<T: LedgerTransport + ?Sized> ListenerGuard<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            ids: Vec::new(),
        }
    }

    pub async fn subscribe(
        &mut self,
        filter: SubscriptionFilter,
        delivery: Delivery,
        sink: EventSink,
    ) -> Result<SubscriptionId, TransportError> {
        let id = self.transport.subscribe(filter, delivery, sink).await?;
        self.ids.push(id);
        Ok(id)
    }

    pub fn ids(&self) -> &[SubscriptionId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<T: LedgerTransport + ?Sized> Drop for ListenerGuard<T> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.transport.unsubscribe(id);
        }
    }
}

/// Topics followed for the whole session. Only the catalog-wide topic is
/// left unfiltered.
fn session_filters(account: Address) -> [SubscriptionFilter; 3] {
    [
        SubscriptionFilter::all(Topic::NewContentAvailable),
        SubscriptionFilter::for_user(Topic::GrantedAccess, account),
        SubscriptionFilter::for_user(Topic::GotPremium, account),
    ]
}

pub struct Session<T: LedgerTransport + ?Sized> {
    listeners: ListenerGuard<T>,
    poll: JoinHandle<()>,
}

impl<T> Session<T>
where
    T: LedgerTransport + ?Sized + 'static,
{
    /// Subscribes the session topics and starts the poll. A failed
    /// subscription releases the ones already taken.
    pub async fn open(
        transport: Arc<T>,
        account: Address,
        poll_interval: Duration,
        sink: EventSink,
    ) -> Result<Self, TransportError> {
        let mut listeners = ListenerGuard::new(Arc::clone(&transport));
        for filter in session_filters(account) {
            let id = listeners
                .subscribe(filter, Delivery::Every, sink.clone())
                .await?;
            debug!(topic = %filter.topic, id = id.0, "session subscription registered");
        }
        let poll = tokio::spawn(run_subscription_poll(
            transport,
            account,
            poll_interval,
            sink,
        ));
        info!(%account, interval_ms = poll_interval.as_millis(), "session started");
        Ok(Self { listeners, poll })
    }

    pub fn subscription_ids(&self) -> &[SubscriptionId] {
        self.listeners.ids()
    }

    pub fn is_polling(&self) -> bool {
        !self.poll.is_finished()
    }
}

impl<T: LedgerTransport + ?Sized> Drop for Session<T> {
    fn drop(&mut self) {
        self.poll.abort();
        debug!(subscriptions = self.listeners.ids().len(), "session closed");
    }
}

/// Re-reads the premium status on every tick, starting immediately. Results
/// are pushed as events; the loop ends once nobody consumes them.
pub async fn run_subscription_poll<T>(
    transport: Arc<T>,
    account: Address,
    period: Duration,
    sink: EventSink,
) where
    T: LedgerTransport + ?Sized,
{
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if !sink.push(StoreEvent::SubscriptionPollStarted) {
            break;
        }
        let event = match transport
            .call(CatalogQuery::IsPremium { user: account }, account)
            .await
        {
            Ok(QueryResponse::IsPremium(active)) => StoreEvent::SubscriptionPolled(active),
            Ok(_) => StoreEvent::SubscriptionPollFailed(
                TransportError::UnexpectedResponse {
                    expected: "IsPremium",
                }
                .to_string(),
            ),
            Err(err) => {
                warn!(error = %err, "subscription poll failed");
                StoreEvent::SubscriptionPollFailed(err.to_string())
            }
        };
        if !sink.push(event) {
            break;
        }
    }
    debug!("subscription poll stopped");
}
