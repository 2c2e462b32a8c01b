//! ProjectionStore: locally cached catalog state folded from ledger events and
//! refresh results.
//!
//! Every fold is keyed by description and idempotent under redelivery, so the
//! store tolerates events arriving before, during or after the submission that
//! caused them.

use std::collections::BTreeSet;

use alloy_primitives::U256;
use catalog_types::{
    decode_text, Address, CatalogItem, ContentStatistics, EncodedText, FeedbackEligibleItem,
    LedgerEvent, OwnedItem, SubscriptionStatus,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::notifier::Notice;

/// Immutable input to the store. Ledger notifications, refresh results and
/// poll outcomes all travel through the same queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Ledger(LedgerEvent),
    CatalogRefreshed(Vec<ContentStatistics>),
    OwnedRefreshed(Vec<EncodedText>),
    FeedbackRefreshed(Vec<(EncodedText, Address)>),
    SubscriptionPollStarted,
    SubscriptionPolled(bool),
    SubscriptionPollFailed(String),
}

/// Serializable read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    pub catalog: Vec<CatalogItem>,
    pub owned: Vec<OwnedItem>,
    pub feedback: Vec<FeedbackEligibleItem>,
    pub subscription: SubscriptionStatus,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectionStore {
    catalog: Vec<CatalogItem>,
    owned: Vec<OwnedItem>,
    feedback: Vec<FeedbackEligibleItem>,
    subscription: SubscriptionStatus,
    authors: Vec<String>,
    genres: Vec<String>,
    followed_authors: BTreeSet<String>,
    followed_genres: BTreeSet<String>,
}

impl ProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &[CatalogItem] {
        &self.catalog
    }

    pub fn owned(&self) -> &[OwnedItem] {
        &self.owned
    }

    pub fn feedback(&self) -> &[FeedbackEligibleItem] {
        &self.feedback
    }

    pub fn subscription(&self) -> SubscriptionStatus {
        self.subscription
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn genres(&self) -> &[String] {
        &self.genres
    }

    pub fn catalog_item(&self, description: &str) -> Option<&CatalogItem> {
        self.catalog.iter().find(|item| item.description == description)
    }

    pub fn owned_item(&self, description: &str) -> Option<&OwnedItem> {
        self.owned.iter().find(|item| item.description == description)
    }

    pub fn feedback_item(&self, description: &str) -> Option<&FeedbackEligibleItem> {
        self.feedback.iter().find(|item| item.description == description)
    }

    /// Catalog entries matching `term`; an empty term keeps everything.
    pub fn filtered(&self, term: &str) -> Vec<CatalogItem> {
        let term = term.trim();
        self.catalog
            .iter()
            .filter(|item| term.is_empty() || item.matches_search(term))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        ProjectionSnapshot {
            catalog: self.catalog.clone(),
            owned: self.owned.clone(),
            feedback: self.feedback.clone(),
            subscription: self.subscription,
            authors: self.authors.clone(),
            genres: self.genres.clone(),
        }
    }

    /// Folds one event and returns the notice it raises, if any.
    pub fn apply(&mut self, event: StoreEvent) -> Option<Notice> {
        match event {
            StoreEvent::Ledger(event) => self.apply_ledger(event),
            StoreEvent::CatalogRefreshed(stats) => {
                self.replace_catalog(stats);
                Some(Notice::info("List updated!", "List of content has been updated"))
            }
            StoreEvent::OwnedRefreshed(grants) => {
                self.owned = grants
                    .iter()
                    .map(decode_text)
                    .enumerate()
                    .map(|(index, description)| OwnedItem {
                        index,
                        resolved_address: self
                            .catalog_item(&description)
                            .and_then(|item| item.resolved_address),
                        description,
                    })
                    .collect();
                Some(Notice::success("Success!", "Bought Content list updated!"))
            }
            StoreEvent::FeedbackRefreshed(entries) => {
                self.feedback = entries
                    .iter()
                    .enumerate()
                    .map(|(index, (description, address))| FeedbackEligibleItem {
                        index,
                        description: decode_text(description),
                        address: *address,
                    })
                    .collect();
                Some(Notice::success("Success!", "List of feedbacks to leave updated!"))
            }
            StoreEvent::SubscriptionPollStarted => {
                self.subscription.is_loading = true;
                None
            }
            StoreEvent::SubscriptionPolled(active) => {
                self.subscription = SubscriptionStatus {
                    is_active: active,
                    is_loading: false,
                };
                None
            }
            StoreEvent::SubscriptionPollFailed(reason) => {
                debug!(%reason, "subscription poll failed");
                self.subscription.is_loading = false;
                Some(Notice::error("Could not retrieve premium subscription status"))
            }
        }
    }

    fn apply_ledger(&mut self, event: LedgerEvent) -> Option<Notice> {
        match event {
            LedgerEvent::NewContentAvailable {
                description,
                genre,
                author,
                price,
            } => {
                let description = decode_text(&description);
                let genre = decode_text(&genre);
                let author = decode_text(&author);
                let notice = (self.followed_authors.contains(&author)
                    || self.followed_genres.contains(&genre))
                .then(|| {
                    Notice::info(
                        "New content!",
                        format!("Content {description} has been published on the Catalog!"),
                    )
                    .for_event()
                });
                self.insert_catalog_item(description, genre, author, price);
                notice
            }
            LedgerEvent::GrantedAccess {
                description,
                content_address,
                ..
            } => {
                let description = decode_text(&description);
                if let Some(item) = self
                    .catalog
                    .iter_mut()
                    .find(|item| item.description == description)
                {
                    item.resolved_address = Some(content_address);
                }
                if self.owned_item(&description).is_none() {
                    self.owned.push(OwnedItem {
                        index: self.owned.len(),
                        description: description.clone(),
                        resolved_address: Some(content_address),
                    });
                }
                Some(
                    Notice::success("Access!", format!("Obtained access to \"{description}\"!"))
                        .for_event(),
                )
            }
            LedgerEvent::GotPremium { .. } => {
                self.mark_premium_active();
                Some(
                    Notice::success("Premium!", "Obtained or extended a Premium subscription!")
                        .for_event(),
                )
            }
            LedgerEvent::ProvideContent { description, .. } => {
                let description = decode_text(&description);
                self.remove_owned(&description);
                Some(
                    Notice::success(
                        "Success!",
                        format!("Content \"{description}\" has been provided!"),
                    )
                    .for_event(),
                )
            }
            LedgerEvent::CanLeaveFeedback {
                description,
                content_address,
                ..
            } => {
                let description = decode_text(&description);
                if self.feedback_item(&description).is_none() {
                    self.feedback.push(FeedbackEligibleItem {
                        index: self.feedback.len(),
                        description: description.clone(),
                        address: content_address,
                    });
                }
                Some(
                    Notice::info(
                        "Leave feedback",
                        format!("You can now leave feedback for {description}"),
                    )
                    .for_event(),
                )
            }
        }
    }

    fn insert_catalog_item(&mut self, description: String, genre: String, author: String, price: U256) {
        if self.catalog_item(&description).is_some() {
            return;
        }
        push_distinct(&mut self.authors, &author);
        push_distinct(&mut self.genres, &genre);
        self.catalog.push(CatalogItem {
            index: self.catalog.len(),
            description,
            genre,
            author,
            price,
            views: 0,
            resolved_address: None,
        });
    }

    fn replace_catalog(&mut self, stats: Vec<ContentStatistics>) {
        let known: Vec<(String, Address)> = self
            .catalog
            .iter()
            .filter_map(|item| item.resolved_address.map(|a| (item.description.clone(), a)))
            .collect();
        self.catalog.clear();
        self.authors.clear();
        self.genres.clear();
        for stat in stats {
            let description = decode_text(&stat.description);
            if self.catalog_item(&description).is_some() {
                continue;
            }
            let author = decode_text(&stat.author);
            let genre = decode_text(&stat.genre);
            push_distinct(&mut self.authors, &author);
            push_distinct(&mut self.genres, &genre);
            let resolved_address = known
                .iter()
                .find(|(known, _)| *known == description)
                .map(|(_, address)| *address);
            self.catalog.push(CatalogItem {
                index: self.catalog.len(),
                description,
                genre,
                author,
                price: stat.price,
                views: stat.views,
                resolved_address,
            });
        }
    }

    /// Records a lazily resolved contract address on the owned entry and the
    /// matching catalog entry.
    pub fn set_owned_address(&mut self, description: &str, address: Address) {
        for item in self.owned.iter_mut().filter(|i| i.description == description) {
            item.resolved_address = Some(address);
        }
        for item in self.catalog.iter_mut().filter(|i| i.description == description) {
            item.resolved_address = Some(address);
        }
    }

    pub fn remove_owned(&mut self, description: &str) -> bool {
        let before = self.owned.len();
        self.owned.retain(|item| item.description != description);
        reindex(&mut self.owned, |item, index| item.index = index);
        self.owned.len() != before
    }

    pub fn remove_feedback(&mut self, description: &str) -> bool {
        let before = self.feedback.len();
        self.feedback.retain(|item| item.description != description);
        reindex(&mut self.feedback, |item, index| item.index = index);
        self.feedback.len() != before
    }

    pub fn mark_premium_active(&mut self) {
        self.subscription = SubscriptionStatus {
            is_active: true,
            is_loading: false,
        };
    }

    pub fn follow_author(&mut self, author: &str) -> Notice {
        if self.followed_authors.insert(author.to_string()) {
            Notice::success("Success!", format!("You've subscribed to new content by {author}!"))
        } else {
            Notice::warning(format!("You was already subscribed to new content by {author}"))
        }
    }

    pub fn follow_genre(&mut self, genre: &str) -> Notice {
        if self.followed_genres.insert(genre.to_string()) {
            Notice::success(
                "Success!",
                format!("You've subscribed to new content with genre {genre}!"),
            )
        } else {
            Notice::warning(format!(
                "You was already subscribed to new content with genre {genre}"
            ))
        }
    }
}

fn push_distinct(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

fn reindex<T>(items: &mut [T], mut set: impl FnMut(&mut T, usize)) {
    for (index, item) in items.iter_mut().enumerate() {
        set(item, index);
    }
}
