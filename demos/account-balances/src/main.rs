//! Account Balances Demo - Runnable Host
//!
//! 1. Seeds an in-memory commit log of deposits and withdrawals
//! 2. Registers the balance and audit projectors
//! 3. Runs the commit serializer until every projector reaches the head (or Ctrl-C)
//! 4. Prints the projected balances

use anyhow::Result;
use commitflow_balances_demo::{AccountBalances, AuditTrail, DemoConfig, projection, seed_commits};
use commitflow_core::projector::{IdentityTable, ProjectorId, ProjectorType};
use commitflow_postgres::PostgresCheckpointStore;
use commitflow_projections::{
    AddressRegistry, COMMIT_SERIALIZER, CommitSerializer, FactoryTable, ProjectorRegistry,
};
use commitflow_runtime::RetryPolicy;
use commitflow_runtime::metrics::MetricsServer;
use commitflow_testing::InMemoryEventStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = DemoConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start()?;
    }

    info!(url = %config.database.url, "Connecting to PostgreSQL");
    let pool = config.database.connect().await?;
    projection::ensure_tables(&pool).await?;

    let events = InMemoryEventStore::new();
    let expected = seed_commits(&events, config.accounts, config.commits);
    info!(commits = events.len(), accounts = expected.len(), "Seeded commit log");

    let identities = IdentityTable::new()
        .declare::<AccountBalances>(ProjectorId::new(1))
        .declare_named::<AuditTrail>(ProjectorId::new(2), "audit-trail");

    let factory = {
        let (balances_pool, audit_pool) = (pool.clone(), pool.clone());
        FactoryTable::new()
            .provide(move || AccountBalances::new(balances_pool.clone()))
            .provide(move || AuditTrail::new(audit_pool.clone()))
    };

    let registry = ProjectorRegistry::builder(identities, Arc::new(factory))
        .register_all([
            ProjectorType::of::<AccountBalances>(),
            ProjectorType::of::<AuditTrail>(),
        ])?
        .build()?;

    let handle = CommitSerializer::new(
        Arc::new(registry),
        Arc::new(events.clone()),
        Arc::new(PostgresCheckpointStore::new(pool.clone())),
    )
    .with_retry_policy(
        RetryPolicy::builder()
            .max_retries(5)
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(5))
            .build(),
    )
    .start()
    .await?;

    let addresses = AddressRegistry::builder()
        .register_address(COMMIT_SERIALIZER, handle.address())?
        .build();
    let serializer = addresses.commit_serializer()?;

    if let Some(head) = events.head() {
        let settled =
            serializer.wait_until(|status| status.is_caught_up(head) || status.state.is_terminal());
        tokio::select! {
            status = settled => {
                let status = status?;
                info!(state = %status.state, head = %head, "Serializer settled");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
            }
        }
    }

    handle.shutdown().await?;

    for (account, balance_cents) in AccountBalances::balances(&pool).await? {
        match expected.get(&account) {
            Some(want) if *want == balance_cents => info!(%account, balance_cents, "Balance"),
            Some(want) => warn!(
                %account,
                balance_cents,
                expected = want,
                "Balance differs from seeded log"
            ),
            None => warn!(%account, balance_cents, "Account not in seeded log"),
        }
    }
    info!(rows = AuditTrail::count(&pool).await?, "Audit trail");

    if let Some(rendered) = metrics.as_ref().and_then(MetricsServer::render) {
        info!("Metrics:\n{rendered}");
    }

    Ok(())
}
