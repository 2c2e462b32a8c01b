use alloy_primitives::U256;
use catalog_types::Address;

use crate::mock_ledger::MockLedger;

const GWEI: u64 = 1_000_000_000;
const FINNEY: u64 = 1_000_000_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct DemoAccounts {
    pub alice: Address,
    pub bob: Address,
    pub carol: Address,
}

/// Three accounts and a small seeded catalog. Carol cannot afford any fee.
pub struct DemoScenario {
    pub accounts: DemoAccounts,
    pub ledger: MockLedger,
}

impl DemoScenario {
    pub fn new() -> Self {
        let accounts = DemoAccounts {
            alice: Address::new([0x01; 20]),
            bob: Address::new([0x02; 20]),
            carol: Address::new([0x03; 20]),
        };

        let mut ledger = MockLedger::new(U256::from(GWEI), U256::from(50 * FINNEY));
        for (description, genre, author, price) in demo_catalog() {
            // Seed titles are short and unique.
            let _ = ledger.publish_content(description, genre, author, U256::from(price));
        }
        ledger.set_balance(accounts.alice, U256::from(1_000 * FINNEY));
        ledger.set_balance(accounts.bob, U256::from(1_000 * FINNEY));
        ledger.set_balance(accounts.carol, U256::from(1_000u64));
        Self { accounts, ledger }
    }
}

impl Default for DemoScenario {
    fn default() -> Self {
        Self::new()
    }
}

fn demo_catalog() -> [(&'static str, &'static str, &'static str, u64); 3] {
    [
        ("Blade Runner", "SciFi", "Scott", 10 * FINNEY),
        ("Kind of Blue", "Jazz", "Davis", 5 * FINNEY),
        ("Solaris", "SciFi", "Tarkovsky", 8 * FINNEY),
    ]
}
