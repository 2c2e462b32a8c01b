//! Fee estimation: prices a contract call before it is submitted.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::U256;
use catalog_types::{Address, ContractCall, EstimateOptions};
use futures::future::join;
use thiserror::Error;
use tracing::debug;

use crate::transport::{LedgerTransport, TransportError};

/// Which collaborator call of the quote pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStage {
    Estimate,
    FeeRate,
    Balance,
}

impl fmt::Display for QuoteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Estimate => "estimateFee",
            Self::FeeRate => "getFeeRate",
            Self::Balance => "getBalance",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("quote failed in {stage}: {source}")]
pub struct QuoteFailure {
    pub stage: QuoteStage,
    #[source]
    pub source: TransportError,
}

/// A priced estimate of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub fee_units: U256,
    pub fee_rate: U256,
    pub balance: U256,
    /// Value attached to the submission (content price, premium price or zero).
    pub payment: U256,
}

impl Quote {
    /// `None` when the fee overflows 256 bits.
    pub fn total_fee(&self) -> Option<U256> {
        self.fee_units.checked_mul(self.fee_rate)
    }

    pub fn total_cost(&self) -> Option<U256> {
        self.total_fee()?.checked_add(self.payment)
    }

    /// Strictly below the balance; an overflowing cost is never affordable.
    pub fn is_affordable(&self) -> bool {
        self.total_cost().is_some_and(|cost| cost < self.balance)
    }
}

/// Runs the three read-only cost queries for one call.
pub struct FeeEstimator<T: ?Sized> {
    transport: Arc<T>,
}

impl<T: ?Sized> Clone for FeeEstimator<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> FeeEstimator<T>
where
    T: LedgerTransport + ?Sized,
{
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// The dry run goes first; fee rate and balance are then fetched
    /// together. When both fail the fee rate failure is reported.
    pub async fn quote(
        &self,
        call: ContractCall,
        from: Address,
        payment: U256,
    ) -> Result<Quote, QuoteFailure> {
        let method = call.method_name();
        let fee_units = self
            .transport
            .estimate_fee(call, EstimateOptions { from, payment })
            .await
            .map_err(|source| QuoteFailure {
                stage: QuoteStage::Estimate,
                source,
            })?;

        let (fee_rate, balance) =
            join(self.transport.fee_rate(), self.transport.balance(from)).await;
        let fee_rate = fee_rate.map_err(|source| QuoteFailure {
            stage: QuoteStage::FeeRate,
            source,
        })?;
        let balance = balance.map_err(|source| QuoteFailure {
            stage: QuoteStage::Balance,
            source,
        })?;

        debug!(%method, %fee_units, %fee_rate, %balance, "quote ready");
        Ok(Quote {
            fee_units,
            fee_rate,
            balance,
            payment,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::U256;
    use catalog_ledger_mock::DemoScenario;
    use catalog_types::{encode_text, ContractCall};

    use super::{FeeEstimator, Quote, QuoteStage};
    use crate::transport::MockTransport;

    fn quote(fee_units: U256, fee_rate: U256, balance: U256, payment: U256) -> Quote {
        Quote {
            fee_units,
            fee_rate,
            balance,
            payment,
        }
    }

    #[test]
    fn affordability_is_strict_and_counts_payment() {
        let one = U256::from(1u64);
        assert!(quote(U256::from(10u64), one, U256::from(11u64), U256::ZERO).is_affordable());
        assert!(!quote(U256::from(10u64), one, U256::from(10u64), U256::ZERO).is_affordable());
        assert!(!quote(U256::from(10u64), one, U256::from(50u64), U256::from(100u64)).is_affordable());
    }

    #[test]
    fn overflowing_fee_is_not_affordable() {
        let q = quote(U256::MAX, U256::from(2u64), U256::MAX, U256::ZERO);
        assert_eq!(q.total_fee(), None);
        assert!(!q.is_affordable());

        let q = quote(U256::MAX, U256::from(1u64), U256::MAX, U256::from(1u64));
        assert_eq!(q.total_cost(), None);
        assert!(!q.is_affordable());

        let q = quote(U256::from(1u64) << 128usize, U256::from(1u64) << 100usize, U256::MAX, U256::ZERO);
        assert!(q.is_affordable());
    }

    #[tokio::test]
    async fn quote_reports_failing_stage() {
        let scenario = DemoScenario::new();
        let alice = scenario.accounts.alice;
        let transport = Arc::new(MockTransport::new(scenario.ledger));
        let estimator = FeeEstimator::new(Arc::clone(&transport));
        let call = ContractCall::GetContent {
            content: encode_text("Solaris").unwrap(),
        };
        let price = U256::from(8_000_000_000_000_000u64);

        let ok = estimator.quote(call.clone(), alice, price).await.unwrap();
        assert_eq!(ok.fee_units, U256::from(90_000u64));
        assert!(ok.is_affordable());

        for (stage, set) in [
            (QuoteStage::Estimate, 0usize),
            (QuoteStage::FeeRate, 1),
            (QuoteStage::Balance, 2),
        ] {
            transport
                .with_ledger(|l| {
                    l.faults = Default::default();
                    match set {
                        0 => l.faults.fail_estimate = true,
                        1 => l.faults.fail_fee_rate = true,
                        _ => l.faults.fail_balance = true,
                    }
                })
                .unwrap();
            let err = estimator.quote(call.clone(), alice, price).await.unwrap_err();
            assert_eq!(err.stage, stage);
        }

        transport
            .with_ledger(|l| {
                l.faults.fail_fee_rate = true;
                l.faults.fail_balance = true;
            })
            .unwrap();
        let err = estimator.quote(call, alice, price).await.unwrap_err();
        assert_eq!(err.stage, QuoteStage::FeeRate);
    }
}
