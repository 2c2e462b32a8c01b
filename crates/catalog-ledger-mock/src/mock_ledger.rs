//! MockLedger: in-memory catalog with purchase rules, premium subscriptions,
//! consumption, feedback, event emission and per-stage fault injection.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{keccak256, U256};
use catalog_types::{
    decode_text, encode_text, Address, CatalogQuery, ContentStatistics, ContractCall, Delivery,
    EncodedText, EstimateOptions, FeedbackScores, LedgerEvent, QueryResponse, Receipt,
    SendOptions, SubscriptionFilter, SubscriptionId, Topic, TxHash,
};
use thiserror::Error;

const GET_CONTENT_FEE_UNITS: u64 = 90_000;
const GIFT_CONTENT_FEE_UNITS: u64 = 110_000;
const GET_CONTENT_PREMIUM_FEE_UNITS: u64 = 70_000;
const BUY_PREMIUM_FEE_UNITS: u64 = 60_000;
const GIFT_PREMIUM_FEE_UNITS: u64 = 65_000;
const LEAVE_FEEDBACK_FEE_UNITS: u64 = 80_000;
const CONSUME_CONTENT_FEE_UNITS: u64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    Unavailable,
    UnknownContent,
    AlreadyOwned,
    RecipientPremium,
    NotPremium,
    NoAccess,
    NoFeedbackPending,
    InvalidScores,
    InsufficientPayment,
    InsufficientFunds,
    OutOfGas,
    DuplicateContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct Rejection {
    pub code: RejectCode,
    pub message: String,
}

fn reject(code: RejectCode, message: impl Into<String>) -> Rejection {
    Rejection {
        code,
        message: message.into(),
    }
}

/// Switches that make individual collaborator calls fail.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    pub fail_estimate: bool,
    pub fail_fee_rate: bool,
    pub fail_balance: bool,
    pub fail_send: bool,
    pub fail_queries: bool,
    pub fail_address_lookup: bool,
    /// Address lookups succeed but report no deployed contract.
    pub unresolvable_addresses: bool,
    /// Consumption events are queued until `release_held_events`.
    pub hold_consume_events: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContent {
    pub description: String,
    pub genre: String,
    pub author: String,
    pub price: U256,
    pub views: u64,
    pub address: Address,
}

/// Callback invoked for each matching event. Returning `false` drops the listener.
pub type Listener = Box<dyn FnMut(LedgerEvent) -> bool + Send>;

struct ListenerEntry {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    delivery: Delivery,
    callback: Listener,
}

pub struct MockLedger {
    catalog: Vec<MockContent>,
    balances: HashMap<Address, U256>,
    premium: HashSet<Address>,
    premium_price: U256,
    fee_rate: U256,
    fee_units_override: Option<U256>,
    grants: HashMap<Address, Vec<String>>,
    pending_feedback: HashMap<Address, Vec<String>>,
    listeners: Vec<ListenerEntry>,
    held_events: Vec<LedgerEvent>,
    next_subscription: u64,
    tx_counter: u64,
    pub faults: FaultPlan,
    pub submitted: Vec<(Address, ContractCall)>,
    pub feedback_log: Vec<(Address, String, FeedbackScores)>,
    pub address_lookups: usize,
}

impl MockLedger {
    pub fn new(fee_rate: U256, premium_price: U256) -> Self {
        Self {
            catalog: Vec::new(),
            balances: HashMap::new(),
            premium: HashSet::new(),
            premium_price,
            fee_rate,
            fee_units_override: None,
            grants: HashMap::new(),
            pending_feedback: HashMap::new(),
            listeners: Vec::new(),
            held_events: Vec::new(),
            next_subscription: 0,
            tx_counter: 0,
            faults: FaultPlan::default(),
            submitted: Vec::new(),
            feedback_log: Vec::new(),
            address_lookups: 0,
        }
    }

    pub fn set_balance(&mut self, address: Address, amount: U256) {
        self.balances.insert(address, amount);
    }

    pub fn balance_of(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or(U256::ZERO)
    }

    pub fn set_fee_rate(&mut self, fee_rate: U256) {
        self.fee_rate = fee_rate;
    }

    /// Forces every estimate (and the submission gas floor) to `units`.
    pub fn set_fee_units(&mut self, units: U256) {
        self.fee_units_override = Some(units);
    }

    pub fn set_premium(&mut self, user: Address, active: bool) {
        if active {
            self.premium.insert(user);
        } else {
            self.premium.remove(&user);
        }
    }

    pub fn is_premium(&self, user: Address) -> bool {
        self.premium.contains(&user)
    }

    pub fn grant_access(&mut self, user: Address, description: &str) {
        self.grants
            .entry(user)
            .or_default()
            .push(description.to_string());
    }

    pub fn grants_of(&self, user: Address) -> Vec<String> {
        self.grants.get(&user).cloned().unwrap_or_default()
    }

    pub fn pending_feedback_of(&self, user: Address) -> Vec<String> {
        self.pending_feedback.get(&user).cloned().unwrap_or_default()
    }

    pub fn content(&self, description: &str) -> Option<&MockContent> {
        self.catalog.iter().find(|c| c.description == description)
    }

    /// Lists a new content and announces it on `NewContentAvailable`.
    pub fn publish_content(
        &mut self,
        description: &str,
        genre: &str,
        author: &str,
        price: U256,
    ) -> Result<Address, Rejection> {
        if self.content(description).is_some() {
            return Err(reject(
                RejectCode::DuplicateContent,
                format!("content `{description}` already published"),
            ));
        }
        let encoded = [description, genre, author]
            .into_iter()
            .map(encode_text)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| reject(RejectCode::UnknownContent, err.to_string()))?;
        let address = content_address_for(description);
        self.catalog.push(MockContent {
            description: description.to_string(),
            genre: genre.to_string(),
            author: author.to_string(),
            price,
            views: 0,
            address,
        });
        self.emit(LedgerEvent::NewContentAvailable {
            description: encoded[0],
            genre: encoded[1],
            author: encoded[2],
            price,
        });
        Ok(address)
    }

    pub fn call(&mut self, from: Address, query: &CatalogQuery) -> Result<QueryResponse, Rejection> {
        if self.faults.fail_queries {
            return Err(reject(RejectCode::Unavailable, "node unavailable"));
        }
        match query {
            CatalogQuery::Statistics => Ok(QueryResponse::Statistics(
                self.catalog
                    .iter()
                    .map(|content| ContentStatistics {
                        description: encode_lossy(&content.description),
                        genre: encode_lossy(&content.genre),
                        author: encode_lossy(&content.author),
                        price: content.price,
                        views: content.views,
                    })
                    .collect(),
            )),
            CatalogQuery::GrantsAvailable => Ok(QueryResponse::Grants(
                self.grants_of(from).iter().map(|d| encode_lossy(d)).collect(),
            )),
            CatalogQuery::FeedbackAvailable => Ok(QueryResponse::FeedbackAvailable(
                self.pending_feedback_of(from)
                    .iter()
                    .filter_map(|d| self.content(d).map(|c| (encode_lossy(d), c.address)))
                    .collect(),
            )),
            CatalogQuery::IsPremium { user } => Ok(QueryResponse::IsPremium(self.is_premium(*user))),
            CatalogQuery::ContentAddress { content } => {
                self.address_lookups += 1;
                if self.faults.fail_address_lookup {
                    return Err(reject(RejectCode::Unavailable, "address lookup failed"));
                }
                if self.faults.unresolvable_addresses {
                    return Ok(QueryResponse::ContentAddress(None));
                }
                let description = decode_text(content);
                Ok(QueryResponse::ContentAddress(
                    self.content(&description).map(|c| c.address),
                ))
            }
            CatalogQuery::PremiumPrice => Ok(QueryResponse::PremiumPrice(self.premium_price)),
        }
    }

    pub fn estimate_fee(
        &mut self,
        call: &ContractCall,
        options: EstimateOptions,
    ) -> Result<U256, Rejection> {
        if self.faults.fail_estimate {
            return Err(reject(RejectCode::Unavailable, "estimate unavailable"));
        }
        self.validate(options.from, call, options.payment, true)?;
        Ok(self.fee_units_for(call))
    }

    pub fn fee_rate(&self) -> Result<U256, Rejection> {
        if self.faults.fail_fee_rate {
            return Err(reject(RejectCode::Unavailable, "fee rate unavailable"));
        }
        Ok(self.fee_rate)
    }

    pub fn balance(&self, address: Address) -> Result<U256, Rejection> {
        if self.faults.fail_balance {
            return Err(reject(RejectCode::Unavailable, "balance unavailable"));
        }
        Ok(self.balance_of(address))
    }

    pub fn send(&mut self, call: &ContractCall, options: SendOptions) -> Result<Receipt, Rejection> {
        if self.faults.fail_send {
            return Err(reject(RejectCode::Unavailable, "submission dropped"));
        }
        self.validate(options.from, call, options.payment, false)?;

        let needed = self.fee_units_for(call);
        if options.fee_units < needed {
            return Err(reject(
                RejectCode::OutOfGas,
                format!("needs {needed} fee units, got {}", options.fee_units),
            ));
        }
        let total = options
            .fee_units
            .checked_mul(options.fee_rate)
            .and_then(|fee| fee.checked_add(options.payment))
            .ok_or_else(|| reject(RejectCode::InsufficientFunds, "cost overflows"))?;
        let balance = self.balance_of(options.from);
        if balance < total {
            return Err(reject(
                RejectCode::InsufficientFunds,
                format!("balance {balance} below cost {total}"),
            ));
        }
        self.balances.insert(options.from, balance - total);

        self.submitted.push((options.from, call.clone()));
        self.apply(options.from, call);

        self.tx_counter += 1;
        let mut preimage = options.from.as_bytes().to_vec();
        preimage.extend_from_slice(&self.tx_counter.to_be_bytes());
        Ok(Receipt {
            tx_hash: TxHash::new(keccak256(preimage).0),
            fee_units_used: needed,
        })
    }

    pub fn subscribe(
        &mut self,
        filter: SubscriptionFilter,
        delivery: Delivery,
        callback: Listener,
    ) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push(ListenerEntry {
            id,
            filter,
            delivery,
            callback,
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|entry| entry.id != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.listeners
            .iter()
            .filter(|entry| entry.filter.topic == topic)
            .count()
    }

    /// Delivers `event` to every matching listener, dropping one-shot and closed ones.
    pub fn emit(&mut self, event: LedgerEvent) {
        self.listeners.retain_mut(|entry| {
            if !entry.filter.matches(&event) {
                return true;
            }
            let open = (entry.callback)(event.clone());
            open && entry.delivery == Delivery::Every
        });
    }

    pub fn release_held_events(&mut self) -> usize {
        let held = std::mem::take(&mut self.held_events);
        let count = held.len();
        for event in held {
            self.emit(event);
        }
        count
    }

    fn fee_units_for(&self, call: &ContractCall) -> U256 {
        if let Some(units) = self.fee_units_override {
            return units;
        }
        let units = match call {
            ContractCall::GetContent { .. } => GET_CONTENT_FEE_UNITS,
            ContractCall::GiftContent { .. } => GIFT_CONTENT_FEE_UNITS,
            ContractCall::GetContentPremium { .. } => GET_CONTENT_PREMIUM_FEE_UNITS,
            ContractCall::BuyPremium => BUY_PREMIUM_FEE_UNITS,
            ContractCall::GiftPremium { .. } => GIFT_PREMIUM_FEE_UNITS,
            ContractCall::LeaveFeedback { .. } => LEAVE_FEEDBACK_FEE_UNITS,
            ContractCall::ConsumeContent { .. } => CONSUME_CONTENT_FEE_UNITS,
        };
        U256::from(units)
    }

    // `dry_run` relaxes the score check: estimates are made with placeholder scores.
    fn validate(
        &self,
        from: Address,
        call: &ContractCall,
        payment: U256,
        dry_run: bool,
    ) -> Result<(), Rejection> {
        match call {
            ContractCall::GetContent { content } => {
                let content = self.content_by_text(content)?;
                self.ensure_not_granted(from, &content.description)?;
                ensure_payment(payment, content.price)
            }
            ContractCall::GiftContent { content, recipient } => {
                let content = self.content_by_text(content)?;
                if self.is_premium(*recipient) {
                    return Err(reject(
                        RejectCode::RecipientPremium,
                        "recipient already has a premium subscription",
                    ));
                }
                self.ensure_not_granted(*recipient, &content.description)?;
                ensure_payment(payment, content.price)
            }
            ContractCall::GetContentPremium { content } => {
                let content = self.content_by_text(content)?;
                if !self.is_premium(from) {
                    return Err(reject(RejectCode::NotPremium, "no premium subscription"));
                }
                self.ensure_not_granted(from, &content.description)
            }
            ContractCall::BuyPremium | ContractCall::GiftPremium { .. } => {
                ensure_payment(payment, self.premium_price)
            }
            ContractCall::LeaveFeedback {
                content_address,
                scores,
            } => {
                let content = self.content_by_address(*content_address)?;
                if !self
                    .pending_feedback
                    .get(&from)
                    .is_some_and(|pending| pending.contains(&content.description))
                {
                    return Err(reject(
                        RejectCode::NoFeedbackPending,
                        format!("no feedback pending for `{}`", content.description),
                    ));
                }
                if !dry_run && !scores.is_valid() {
                    return Err(reject(RejectCode::InvalidScores, "scores out of range"));
                }
                Ok(())
            }
            ContractCall::ConsumeContent { content_address } => {
                let content = self.content_by_address(*content_address)?;
                if !self
                    .grants
                    .get(&from)
                    .is_some_and(|granted| granted.contains(&content.description))
                {
                    return Err(reject(
                        RejectCode::NoAccess,
                        format!("no access granted to `{}`", content.description),
                    ));
                }
                Ok(())
            }
        }
    }

    fn apply(&mut self, from: Address, call: &ContractCall) {
        match call {
            ContractCall::GetContent { content } | ContractCall::GetContentPremium { content } => {
                self.grant_and_announce(from, content);
            }
            ContractCall::GiftContent { content, recipient } => {
                self.grant_and_announce(*recipient, content);
            }
            ContractCall::BuyPremium => {
                self.premium.insert(from);
                self.emit(LedgerEvent::GotPremium { user: from });
            }
            ContractCall::GiftPremium { recipient } => {
                self.premium.insert(*recipient);
                self.emit(LedgerEvent::GotPremium { user: *recipient });
            }
            ContractCall::LeaveFeedback {
                content_address,
                scores,
            } => {
                let Some(description) = self.description_at(*content_address) else {
                    return;
                };
                if let Some(pending) = self.pending_feedback.get_mut(&from) {
                    pending.retain(|d| d != &description);
                }
                self.feedback_log.push((from, description, *scores));
            }
            ContractCall::ConsumeContent { content_address } => {
                let Some(description) = self.description_at(*content_address) else {
                    return;
                };
                if let Some(granted) = self.grants.get_mut(&from) {
                    if let Some(pos) = granted.iter().position(|d| d == &description) {
                        granted.remove(pos);
                    }
                }
                if let Some(content) = self
                    .catalog
                    .iter_mut()
                    .find(|c| c.description == description)
                {
                    content.views += 1;
                }
                self.pending_feedback
                    .entry(from)
                    .or_default()
                    .push(description.clone());

                let encoded = encode_lossy(&description);
                let events = [
                    LedgerEvent::ProvideContent {
                        user: from,
                        description: encoded,
                        content_address: *content_address,
                    },
                    LedgerEvent::CanLeaveFeedback {
                        user: from,
                        description: encoded,
                        content_address: *content_address,
                    },
                ];
                for event in events {
                    if self.faults.hold_consume_events {
                        self.held_events.push(event);
                    } else {
                        self.emit(event);
                    }
                }
            }
        }
    }

    fn grant_and_announce(&mut self, user: Address, content: &EncodedText) {
        let description = decode_text(content);
        let Some(address) = self.content(&description).map(|c| c.address) else {
            return;
        };
        self.grant_access(user, &description);
        self.emit(LedgerEvent::GrantedAccess {
            user,
            description: *content,
            content_address: address,
        });
    }

    fn ensure_not_granted(&self, user: Address, description: &str) -> Result<(), Rejection> {
        if self
            .grants
            .get(&user)
            .is_some_and(|granted| granted.iter().any(|d| d == description))
        {
            return Err(reject(
                RejectCode::AlreadyOwned,
                format!("access to `{description}` already granted"),
            ));
        }
        Ok(())
    }

    fn content_by_text(&self, content: &EncodedText) -> Result<&MockContent, Rejection> {
        let description = decode_text(content);
        self.content(&description).ok_or_else(|| {
            reject(
                RejectCode::UnknownContent,
                format!("unknown content `{description}`"),
            )
        })
    }

    fn content_by_address(&self, address: Address) -> Result<&MockContent, Rejection> {
        self.catalog
            .iter()
            .find(|c| c.address == address)
            .ok_or_else(|| reject(RejectCode::UnknownContent, format!("no content at {address}")))
    }

    fn description_at(&self, address: Address) -> Option<String> {
        self.catalog
            .iter()
            .find(|c| c.address == address)
            .map(|c| c.description.clone())
    }
}

fn ensure_payment(payment: U256, price: U256) -> Result<(), Rejection> {
    if payment < price {
        return Err(reject(
            RejectCode::InsufficientPayment,
            format!("payment {payment} below price {price}"),
        ));
    }
    Ok(())
}

// Catalog text is validated on publish, so re-encoding cannot overflow a word.
fn encode_lossy(text: &str) -> EncodedText {
    encode_text(text).unwrap_or_default()
}

/// Deterministic contract address for a published content.
pub fn content_address_for(description: &str) -> Address {
    let digest = keccak256(description.as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address::new(out)
}
