use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use catalog_client::{
    CatalogClient, ClientConfig, EngineError, MockTransport, OperationRequest, Outcome,
    ScriptedGate, TracingNotifier,
};
use catalog_ledger_mock::{DemoAccounts, DemoScenario};
use catalog_types::{format_amount, Address, FeedbackScores};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "catalog-demo", about = "Catalog client walkthrough on an in-memory ledger")]
struct Cli {
    /// Acting account: alice, bob, carol or a 20-byte hex address.
    #[arg(long, default_value = "alice")]
    account: String,

    /// Subscription status poll interval in milliseconds.
    #[arg(long, default_value = "20000")]
    poll_interval_ms: u64,

    /// Fee rate per unit, in wei.
    #[arg(long, default_value = "1000000000")]
    fee_rate: u64,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

fn resolve_account(name: &str, accounts: &DemoAccounts) -> Result<Address, Box<dyn std::error::Error>> {
    let address = match name {
        "alice" => accounts.alice,
        "bob" => accounts.bob,
        "carol" => accounts.carol,
        other => other.parse()?,
    };
    Ok(address)
}

type Client = CatalogClient<MockTransport>;

async fn submit(client: &mut Client, request: OperationRequest) -> Result<(), Box<dyn std::error::Error>> {
    let kind = request.kind;
    match client.run(request, &mut ScriptedGate::accepting()).await {
        Ok(Outcome::Submitted(receipt)) => info!(%kind, tx_hash = %receipt.tx_hash, "submitted"),
        Ok(Outcome::Declined) => info!(%kind, "declined"),
        // Already surfaced through the notifier.
        Err(EngineError::Operation(err)) => warn!(%kind, error = %err, "operation failed"),
        Err(err) => return Err(err.into()),
    }
    client.drain_events();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log.as_str().into()),
        )
        .with_target(false)
        .compact()
        .init();

    let mut scenario = DemoScenario::new();
    let accounts = scenario.accounts;
    scenario.ledger.set_fee_rate(U256::from(cli.fee_rate));
    let account = resolve_account(&cli.account, &accounts)?;
    let recipient = if account == accounts.bob {
        accounts.alice
    } else {
        accounts.bob
    };

    let transport = Arc::new(MockTransport::new(scenario.ledger));
    let config = ClientConfig::new(account).with_poll_interval(Duration::from_millis(cli.poll_interval_ms));
    let mut client = CatalogClient::new(Arc::clone(&transport), config, Arc::new(TracingNotifier));
    client.start().await?;
    client.refresh_catalog().await?;
    client.refresh_owned().await?;
    client.refresh_feedback().await?;

    client.follow_genre("SciFi");
    client.follow_genre("SciFi");
    transport.with_ledger(|ledger| {
        ledger.publish_content("Stalker", "SciFi", "Tarkovsky", U256::from(7_000_000_000_000_000u64))
    })??;
    client.drain_events();
    info!(matches = client.search("tarkovsky").len(), "search for tarkovsky");

    let Some(solaris) = client.store().catalog_item("Solaris").cloned() else {
        return Err("catalog is missing Solaris".into());
    };
    submit(&mut client, OperationRequest::buy(&solaris)).await?;

    let Some(jazz) = client.store().catalog_item("Kind of Blue").cloned() else {
        return Err("catalog is missing Kind of Blue".into());
    };
    submit(&mut client, OperationRequest::gift(&jazz, recipient)).await?;

    let price = client.premium_price().await?;
    info!(price = %format_amount(price), "premium price");
    submit(&mut client, OperationRequest::buy_premium(price)).await?;

    let Some(blade_runner) = client.store().catalog_item("Blade Runner").cloned() else {
        return Err("catalog is missing Blade Runner".into());
    };
    submit(&mut client, OperationRequest::access_premium(&blade_runner)).await?;

    client.refresh_owned().await?;
    for owned in client.store().owned().to_vec() {
        submit(&mut client, OperationRequest::consume(&owned)).await?;
    }

    for eligible in client.store().feedback().to_vec() {
        submit(
            &mut client,
            OperationRequest::leave_feedback(&eligible, FeedbackScores::new(5, 4, 5)),
        )
        .await?;
    }

    submit(&mut client, OperationRequest::gift_premium(price, accounts.carol)).await?;

    let snapshot = client.snapshot();
    info!(
        catalog = snapshot.catalog.len(),
        owned = snapshot.owned.len(),
        feedback = snapshot.feedback.len(),
        premium = snapshot.subscription.is_active,
        "final projection"
    );
    let balance = transport.with_ledger(|ledger| ledger.balance_of(account))?;
    info!(balance = %format_amount(balance), "final balance");

    client.stop();
    Ok(())
}
