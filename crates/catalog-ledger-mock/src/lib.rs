//! Mock catalog ledger for exercising the client without a real node.

pub mod mock_ledger;
pub mod scenarios;

pub use mock_ledger::{FaultPlan, Listener, MockContent, MockLedger, RejectCode, Rejection};
pub use scenarios::{DemoAccounts, DemoScenario};
