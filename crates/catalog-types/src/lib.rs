pub mod codec;
pub mod error;
pub mod ids;
pub mod model;
pub mod rpc;

pub use alloy_primitives::U256;
pub use codec::{decode_text, encode_text, format_amount};
pub use error::ValidationError;
pub use ids::{Address, EncodedText, TxHash};
pub use model::{CatalogItem, FeedbackEligibleItem, FeedbackScores, OwnedItem, SubscriptionStatus};
pub use rpc::{
    CatalogQuery, ContentStatistics, ContractCall, Delivery, EstimateOptions, LedgerEvent,
    QueryResponse, Receipt, SendOptions, SubscriptionFilter, SubscriptionId, Topic,
};
