//! Operation state machine and the single pending-operation slot.

use std::fmt;

use alloy_primitives::U256;
use catalog_types::{
    encode_text, Address, CatalogItem, ContractCall, FeedbackEligibleItem, FeedbackScores,
    OwnedItem,
};
use thiserror::Error;

use crate::error::OperationError;
use crate::fee::Quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Quoting,
    AwaitingConfirmation,
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Begin,
    QuoteReady,
    QuoteFailed,
    Confirm,
    Decline,
    Settled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: EngineState,
    pub event: EngineEvent,
}

pub fn transition(current: EngineState, event: EngineEvent) -> Result<EngineState, TransitionError> {
    match (current, event) {
        (EngineState::Idle, EngineEvent::Begin) => Ok(EngineState::Quoting),
        (EngineState::Quoting, EngineEvent::QuoteReady) => Ok(EngineState::AwaitingConfirmation),
        (EngineState::Quoting, EngineEvent::QuoteFailed) => Ok(EngineState::Idle),
        (EngineState::AwaitingConfirmation, EngineEvent::Confirm) => Ok(EngineState::Submitting),
        (EngineState::AwaitingConfirmation, EngineEvent::Decline) => Ok(EngineState::Idle),
        (EngineState::Submitting, EngineEvent::Settled) => Ok(EngineState::Idle),
        _ => Err(TransitionError {
            from: current,
            event,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    BuyOwn,
    BuyGift,
    /// Obtain content with an active premium subscription; nothing is paid.
    AccessPremium,
    BuyPremium,
    GiftPremium,
    Consume,
    LeaveFeedback,
}

impl OperationKind {
    pub fn needs_target(self) -> bool {
        !matches!(self, Self::BuyPremium | Self::GiftPremium)
    }

    pub fn needs_recipient(self) -> bool {
        matches!(self, Self::BuyGift | Self::GiftPremium)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BuyOwn => "buy",
            Self::BuyGift => "gift",
            Self::AccessPremium => "access-premium",
            Self::BuyPremium => "buy-premium",
            Self::GiftPremium => "gift-premium",
            Self::Consume => "consume",
            Self::LeaveFeedback => "leave-feedback",
        };
        f.write_str(name)
    }
}

/// Reference to the catalog content an operation acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    pub description: String,
    pub address: Option<Address>,
}

impl TargetRef {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }
}

/// A user intent handed to `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub target: Option<TargetRef>,
    pub recipient: Option<Address>,
    pub payment: U256,
    /// Real feedback scores; estimates use the configured placeholder.
    pub scores: Option<FeedbackScores>,
}

impl OperationRequest {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            target: None,
            recipient: None,
            payment: U256::ZERO,
            scores: None,
        }
    }

    pub fn buy(item: &CatalogItem) -> Self {
        Self {
            target: Some(catalog_target(item)),
            payment: item.price,
            ..Self::new(OperationKind::BuyOwn)
        }
    }

    pub fn gift(item: &CatalogItem, recipient: Address) -> Self {
        Self {
            target: Some(catalog_target(item)),
            recipient: Some(recipient),
            payment: item.price,
            ..Self::new(OperationKind::BuyGift)
        }
    }

    pub fn access_premium(item: &CatalogItem) -> Self {
        Self {
            target: Some(catalog_target(item)),
            ..Self::new(OperationKind::AccessPremium)
        }
    }

    pub fn buy_premium(price: U256) -> Self {
        Self {
            payment: price,
            ..Self::new(OperationKind::BuyPremium)
        }
    }

    pub fn gift_premium(price: U256, recipient: Address) -> Self {
        Self {
            recipient: Some(recipient),
            payment: price,
            ..Self::new(OperationKind::GiftPremium)
        }
    }

    pub fn consume(item: &OwnedItem) -> Self {
        Self {
            target: Some(TargetRef {
                description: item.description.clone(),
                address: item.resolved_address,
            }),
            ..Self::new(OperationKind::Consume)
        }
    }

    pub fn leave_feedback(item: &FeedbackEligibleItem, scores: FeedbackScores) -> Self {
        Self {
            target: Some(TargetRef::new(item.description.clone()).with_address(item.address)),
            scores: Some(scores),
            ..Self::new(OperationKind::LeaveFeedback)
        }
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_recipient(mut self, recipient: Address) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_payment(mut self, payment: U256) -> Self {
        self.payment = payment;
        self
    }
}

fn catalog_target(item: &CatalogItem) -> TargetRef {
    TargetRef {
        description: item.description.clone(),
        address: item.resolved_address,
    }
}

/// The engine's single in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub target: Option<TargetRef>,
    pub recipient: Option<Address>,
    pub payment: U256,
    pub quote: Option<Quote>,
    pub scores: Option<FeedbackScores>,
}

impl PendingOperation {
    /// Checks that the request carries what its kind needs.
    pub fn from_request(request: OperationRequest) -> Result<Self, OperationError> {
        let kind = request.kind;
        if kind.needs_target()
            && request
                .target
                .as_ref()
                .map_or(true, |t| t.description.is_empty())
        {
            return Err(OperationError::NoTargetSelected);
        }
        if kind.needs_recipient() && request.recipient.is_none() {
            return Err(OperationError::MissingRecipient);
        }
        if let Some(scores) = request.scores.filter(|s| !s.is_valid()) {
            return Err(OperationError::InvalidScores { scores });
        }
        let payment = match kind {
            OperationKind::AccessPremium | OperationKind::Consume | OperationKind::LeaveFeedback => {
                U256::ZERO
            }
            _ => request.payment,
        };
        Ok(Self {
            kind,
            target: request.target,
            recipient: request.recipient,
            payment,
            quote: None,
            scores: request.scores,
        })
    }

    pub fn description(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.description.as_str())
    }

    pub fn is_affordable(&self) -> bool {
        self.quote.is_some_and(|q| q.is_affordable())
    }

    /// Builds the ledger call for this operation. `scores` only matters for
    /// feedback.
    pub fn contract_call(&self, scores: FeedbackScores) -> Result<ContractCall, OperationError> {
        let call = match self.kind {
            OperationKind::BuyOwn => ContractCall::GetContent {
                content: encode_text(self.target()?)?,
            },
            OperationKind::BuyGift => ContractCall::GiftContent {
                content: encode_text(self.target()?)?,
                recipient: self.recipient()?,
            },
            OperationKind::AccessPremium => ContractCall::GetContentPremium {
                content: encode_text(self.target()?)?,
            },
            OperationKind::BuyPremium => ContractCall::BuyPremium,
            OperationKind::GiftPremium => ContractCall::GiftPremium {
                recipient: self.recipient()?,
            },
            OperationKind::Consume => ContractCall::ConsumeContent {
                content_address: self.target_address()?,
            },
            OperationKind::LeaveFeedback => ContractCall::LeaveFeedback {
                content_address: self.target_address()?,
                scores,
            },
        };
        Ok(call)
    }

    fn target(&self) -> Result<&str, OperationError> {
        self.description().ok_or(OperationError::NoTargetSelected)
    }

    fn recipient(&self) -> Result<Address, OperationError> {
        self.recipient.ok_or(OperationError::MissingRecipient)
    }

    fn target_address(&self) -> Result<Address, OperationError> {
        let target = self.target.as_ref().ok_or(OperationError::NoTargetSelected)?;
        target.address.ok_or_else(|| OperationError::ResolutionFailure {
            description: target.description.clone(),
            reason: "address not resolved".to_string(),
        })
    }
}
