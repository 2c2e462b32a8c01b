//! Local projection records for catalog state.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::ids::Address;

/// A content listed on the catalog. `description` is the uniqueness key; `index`
/// is only stable within one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub index: usize,
    pub description: String,
    pub genre: String,
    pub author: String,
    pub price: U256,
    pub views: u64,
    pub resolved_address: Option<Address>,
}

impl CatalogItem {
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.description.to_lowercase().contains(&term)
            || self.genre.to_lowercase().contains(&term)
            || self.author.to_lowercase().contains(&term)
    }
}

/// A content the acting identity has been granted access to and not yet consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedItem {
    pub index: usize,
    pub description: String,
    pub resolved_address: Option<Address>,
}

/// A consumed content the acting identity may still rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEligibleItem {
    pub index: usize,
    pub description: String,
    pub address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub is_active: bool,
    pub is_loading: bool,
}

/// Ratings attached to a feedback submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackScores {
    pub appreciation: u8,
    pub fairness: u8,
    pub suggest: u8,
}

impl FeedbackScores {
    pub const MAX: u8 = 5;

    pub const fn new(appreciation: u8, fairness: u8, suggest: u8) -> Self {
        Self {
            appreciation,
            fairness,
            suggest,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.appreciation, self.fairness, self.suggest]
            .iter()
            .all(|score| (1..=Self::MAX).contains(score))
    }
}

impl Default for FeedbackScores {
    fn default() -> Self {
        Self::new(Self::MAX, Self::MAX, Self::MAX)
    }
}
