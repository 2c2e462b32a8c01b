//! User-facing texts for operation failures and successes.

use catalog_types::{CatalogQuery, FeedbackScores};

use crate::engine::OperationKind;
use crate::error::OperationError;
use crate::fee::QuoteStage;
use crate::notifier::Notice;

const FEE_RATE_FAILED: &str = "Could not get gas price from the blockchain, check the connection";
const BALANCE_FAILED: &str = "Could not get balance for the current account, check the connection";

fn estimate_hint(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::BuyOwn | OperationKind::BuyGift => {
            "Unable to buy Content, check if already bought or if recipient has a premium subscription"
        }
        OperationKind::AccessPremium => {
            "Unable to obtain access to Content, check if you have a subscription"
        }
        OperationKind::BuyPremium | OperationKind::GiftPremium => {
            "Unable to buy Premium subscription, check the subscription price"
        }
        OperationKind::Consume => "Unable to consume Content, check if access was granted",
        OperationKind::LeaveFeedback => "Unable to leave feedback, check if it was already left",
    }
}

fn submission_failed(kind: OperationKind, description: Option<&str>) -> String {
    match kind {
        OperationKind::BuyOwn | OperationKind::BuyGift | OperationKind::AccessPremium => {
            "Could not complete purchase".to_string()
        }
        OperationKind::BuyPremium | OperationKind::GiftPremium => {
            "Could not buy/gift content".to_string()
        }
        OperationKind::Consume => {
            "Request for access denied or other error, check the log".to_string()
        }
        OperationKind::LeaveFeedback => {
            format!("Could not leave feedback for {}", description.unwrap_or("content"))
        }
    }
}

/// The single notice raised for a failed operation.
pub fn failure_notice(kind: OperationKind, description: Option<&str>, err: &OperationError) -> Notice {
    let message = match err {
        OperationError::QuoteFailure(failure) => match failure.stage {
            QuoteStage::Estimate => estimate_hint(kind).to_string(),
            QuoteStage::FeeRate => FEE_RATE_FAILED.to_string(),
            QuoteStage::Balance => BALANCE_FAILED.to_string(),
        },
        OperationError::SubmissionFailure { .. } => submission_failed(kind, description),
        OperationError::ResolutionFailure { .. } => "Could not get Content's address".to_string(),
        OperationError::NoTargetSelected => "No selected content".to_string(),
        OperationError::MissingRecipient => "No recipient selected".to_string(),
        OperationError::InvalidScores { .. } => {
            format!("Feedback scores must be between 1 and {}", FeedbackScores::MAX)
        }
        OperationError::Encoding(_) | OperationError::QueryFailure { .. } => err.to_string(),
    };
    Notice::error(message)
}

/// Notice for a failed refresh or lookup query.
pub fn query_failure_notice(query: &CatalogQuery, err: &OperationError) -> Notice {
    let message = match query {
        CatalogQuery::Statistics => "Couldn't fetch Catalog content".to_string(),
        CatalogQuery::GrantsAvailable => "Could not retrieve bought content".to_string(),
        CatalogQuery::FeedbackAvailable => {
            "Could not retrieve list of content to leave feedback for".to_string()
        }
        CatalogQuery::IsPremium { .. } => {
            "Could not retrieve premium subscription status".to_string()
        }
        CatalogQuery::PremiumPrice => {
            "Could not fetch Premium subscription price from Catalog".to_string()
        }
        CatalogQuery::ContentAddress { .. } => "Could not get Content's address".to_string(),
    };
    tracing::debug!(method = query.method_name(), error = %err, "query notice");
    Notice::error(message)
}

/// Success notice after reconciliation; purchases of content stay silent
/// until the access notification arrives.
pub fn success_notice(
    kind: OperationKind,
    description: Option<&str>,
    was_premium: bool,
) -> Option<Notice> {
    let message = match kind {
        OperationKind::BuyOwn | OperationKind::BuyGift | OperationKind::AccessPremium => {
            return None
        }
        OperationKind::BuyPremium => format!(
            "You {} Premium subscription!",
            if was_premium { "extended your" } else { "bought a" }
        ),
        OperationKind::GiftPremium => "Gifted a premium subscription to the other user".to_string(),
        OperationKind::LeaveFeedback => {
            format!("Left feedback for content {}", description.unwrap_or_default())
        }
        OperationKind::Consume => "Request for access sent".to_string(),
    };
    Some(Notice::success("Success!", message))
}
