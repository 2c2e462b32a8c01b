//! Confirmation gate: shows a quote and waits for the user's decision.

use std::collections::VecDeque;

use alloy_primitives::U256;
use async_trait::async_trait;
use catalog_types::format_amount;
use tokio::sync::{mpsc, oneshot};

use crate::engine::OperationKind;
use crate::fee::Quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    /// Also the outcome of dismissing the prompt.
    Declined,
}

/// Rendering data for the confirmation dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub kind: OperationKind,
    pub title: String,
    pub lines: Vec<String>,
    pub fee_units: U256,
    pub accept_enabled: bool,
}

impl ConfirmationPrompt {
    pub fn from_quote(kind: OperationKind, quote: &Quote) -> Self {
        let accept_enabled = quote.is_affordable();
        let title = if accept_enabled {
            "Perform the transaction?"
        } else {
            "Insufficient funds"
        };
        let mut lines = vec![format!("Estimated fee units: {}", quote.fee_units)];
        match quote.total_fee() {
            Some(fee) => lines.push(format!("Estimated transaction cost is {}", format_amount(fee))),
            None => lines.push("Estimated transaction cost exceeds any balance".to_string()),
        }
        if !quote.payment.is_zero() {
            lines.push(format!("Payment attached is {}", format_amount(quote.payment)));
        }
        if accept_enabled {
            lines.push(format!("Account balance is {}", format_amount(quote.balance)));
        } else {
            lines.push(format!(
                "Insufficient funds in the account ({})",
                format_amount(quote.balance)
            ));
        }
        Self {
            kind,
            title: title.to_string(),
            lines,
            fee_units: quote.fee_units,
            accept_enabled,
        }
    }

    /// Accept is unreachable on an unaffordable prompt.
    pub fn resolve(&self, decision: Decision) -> Decision {
        match decision {
            Decision::Accepted if self.accept_enabled => Decision::Accepted,
            _ => Decision::Declined,
        }
    }
}

#[async_trait]
pub trait ConfirmationGate: Send {
    async fn present(&mut self, prompt: &ConfirmationPrompt) -> Decision;
}

/// Answers prompts from a fixed script; an exhausted script declines.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGate {
    answers: VecDeque<Decision>,
    seen: Vec<ConfirmationPrompt>,
}

impl ScriptedGate {
    pub fn new(answers: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            seen: Vec::new(),
        }
    }

    pub fn accepting() -> Self {
        Self::new([Decision::Accepted])
    }

    pub fn seen(&self) -> &[ConfirmationPrompt] {
        &self.seen
    }
}

#[async_trait]
impl ConfirmationGate for ScriptedGate {
    async fn present(&mut self, prompt: &ConfirmationPrompt) -> Decision {
        self.seen.push(prompt.clone());
        let answer = self.answers.pop_front().unwrap_or(Decision::Declined);
        prompt.resolve(answer)
    }
}

/// A prompt waiting for an answer from the presentation layer.
#[derive(Debug)]
pub struct PromptRequest {
    pub prompt: ConfirmationPrompt,
    pub reply: oneshot::Sender<Decision>,
}

/// Forwards prompts over a channel to whoever renders them.
#[derive(Debug, Clone)]
pub struct ChannelGate {
    tx: mpsc::Sender<PromptRequest>,
}

impl ChannelGate {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PromptRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConfirmationGate for ChannelGate {
    async fn present(&mut self, prompt: &ConfirmationPrompt) -> Decision {
        let (reply, answer) = oneshot::channel();
        let request = PromptRequest {
            prompt: prompt.clone(),
            reply,
        };
        if self.tx.send(request).await.is_err() {
            return Decision::Declined;
        }
        // A dropped reply sender counts as dismissal.
        prompt.resolve(answer.await.unwrap_or(Decision::Declined))
    }
}
