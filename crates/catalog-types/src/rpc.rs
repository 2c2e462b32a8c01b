//! Vocabulary of the narrow RPC surface the catalog service exposes: read-only
//! queries, state-changing contract calls, notification topics and their events.

use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::ids::{Address, EncodedText, TxHash};
use crate::model::FeedbackScores;

/// Read-only queries answered by `call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogQuery {
    Statistics,
    GrantsAvailable,
    FeedbackAvailable,
    IsPremium { user: Address },
    ContentAddress { content: EncodedText },
    PremiumPrice,
}

impl CatalogQuery {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Statistics => "getStatistics",
            Self::GrantsAvailable => "grantsAvailable",
            Self::FeedbackAvailable => "feedbackAvailable",
            Self::IsPremium { .. } => "isPremium",
            Self::ContentAddress { .. } => "getContentAddress",
            Self::PremiumPrice => "premiumPrice",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStatistics {
    pub description: EncodedText,
    pub genre: EncodedText,
    pub author: EncodedText,
    pub price: U256,
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponse {
    Statistics(Vec<ContentStatistics>),
    Grants(Vec<EncodedText>),
    FeedbackAvailable(Vec<(EncodedText, Address)>),
    IsPremium(bool),
    /// `None` when the catalog has no deployed contract for the content.
    ContentAddress(Option<Address>),
    PremiumPrice(U256),
}

/// State-changing calls submitted with `send` (and dry-run with `estimateFee`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    GetContent { content: EncodedText },
    GiftContent { content: EncodedText, recipient: Address },
    GetContentPremium { content: EncodedText },
    BuyPremium,
    GiftPremium { recipient: Address },
    LeaveFeedback { content_address: Address, scores: FeedbackScores },
    ConsumeContent { content_address: Address },
}

impl ContractCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::GetContent { .. } => "getContent",
            Self::GiftContent { .. } => "giftContent",
            Self::GetContentPremium { .. } => "getContentPremium",
            Self::BuyPremium => "buyPremium",
            Self::GiftPremium { .. } => "giftPremium",
            Self::LeaveFeedback { .. } => "leaveFeedback",
            Self::ConsumeContent { .. } => "consumeContent",
        }
    }
}

/// Options for a dry-run estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimateOptions {
    pub from: Address,
    pub payment: U256,
}

/// Options for a submission, carrying the quoted fee parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub from: Address,
    pub fee_units: U256,
    pub fee_rate: U256,
    pub payment: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub fee_units_used: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    NewContentAvailable,
    GrantedAccess,
    GotPremium,
    ProvideContent,
    CanLeaveFeedback,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NewContentAvailable => "NewContentAvailable",
            Self::GrantedAccess => "GrantedAccess",
            Self::GotPremium => "GotPremium",
            Self::ProvideContent => "ProvideContent",
            Self::CanLeaveFeedback => "CanLeaveFeedback",
        };
        f.write_str(name)
    }
}

/// A notification emitted by the ledger. Text fields stay in ledger encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    NewContentAvailable {
        description: EncodedText,
        genre: EncodedText,
        author: EncodedText,
        price: U256,
    },
    GrantedAccess {
        user: Address,
        description: EncodedText,
        content_address: Address,
    },
    GotPremium {
        user: Address,
    },
    ProvideContent {
        user: Address,
        description: EncodedText,
        content_address: Address,
    },
    CanLeaveFeedback {
        user: Address,
        description: EncodedText,
        content_address: Address,
    },
}

impl LedgerEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::NewContentAvailable { .. } => Topic::NewContentAvailable,
            Self::GrantedAccess { .. } => Topic::GrantedAccess,
            Self::GotPremium { .. } => Topic::GotPremium,
            Self::ProvideContent { .. } => Topic::ProvideContent,
            Self::CanLeaveFeedback { .. } => Topic::CanLeaveFeedback,
        }
    }

    /// Emitting content contract, for content-scoped topics.
    pub fn content_address(&self) -> Option<Address> {
        match self {
            Self::GrantedAccess {
                content_address, ..
            }
            | Self::ProvideContent {
                content_address, ..
            }
            | Self::CanLeaveFeedback {
                content_address, ..
            } => Some(*content_address),
            Self::NewContentAvailable { .. } | Self::GotPremium { .. } => None,
        }
    }

    /// Indexed user field, if the topic carries one.
    pub fn user(&self) -> Option<Address> {
        match self {
            Self::NewContentAvailable { .. } => None,
            Self::GrantedAccess { user, .. }
            | Self::GotPremium { user }
            | Self::ProvideContent { user, .. }
            | Self::CanLeaveFeedback { user, .. } => Some(*user),
        }
    }
}

/// Topic filter. `user: None` receives every event on the topic; `content`
/// narrows content-scoped topics to one content contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub topic: Topic,
    pub user: Option<Address>,
    pub content: Option<Address>,
}

impl SubscriptionFilter {
    pub fn all(topic: Topic) -> Self {
        Self {
            topic,
            user: None,
            content: None,
        }
    }

    pub fn for_user(topic: Topic, user: Address) -> Self {
        Self {
            user: Some(user),
            ..Self::all(topic)
        }
    }

    pub fn for_content(topic: Topic, user: Address, content: Address) -> Self {
        Self {
            content: Some(content),
            ..Self::for_user(topic, user)
        }
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        if event.topic() != self.topic {
            return false;
        }
        if self.user.is_some_and(|wanted| event.user() != Some(wanted)) {
            return false;
        }
        match self.content {
            None => true,
            Some(wanted) => event.content_address() == Some(wanted),
        }
    }
}

/// Whether a listener stays registered after its first delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Every,
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);
