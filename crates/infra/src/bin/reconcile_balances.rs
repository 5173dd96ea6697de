//! Recompute every customer's outstanding balance from their invoices.
//!
//! Reports drift by default; pass `--rewrite` to overwrite the drifted
//! caches. Reads `DATABASE_URL` (and the other `LEDGER_*` settings) from the
//! environment or a `.env` file.

use anyhow::{Context, bail};
use tracing::{info, warn};

use stockledger_core::UserId;
use stockledger_infra::audit::PostgresAuditLog;
use stockledger_infra::store::PostgresLedgerStore;
use stockledger_infra::{LedgerConfig, LedgerEngine, RequestContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    stockledger_observability::init();

    let rewrite = std::env::args().skip(1).any(|arg| arg == "--rewrite");
    let config = LedgerConfig::from_env().context("loading ledger config")?;
    let Some(database_url) = config.database_url.clone() else {
        bail!("{} must be set", LedgerConfig::DATABASE_URL);
    };

    let store = PostgresLedgerStore::connect(&database_url, config.db_max_connections)
        .await
        .context("connecting to postgres")?;
    store.ensure_schema().await.context("applying schema")?;
    let audit = PostgresAuditLog::new(store.pool().clone());

    let engine = LedgerEngine::new(store, audit, config);
    let ctx = RequestContext::new(UserId::new());
    let report = engine
        .reconcile_customer_balances(&ctx, rewrite)
        .await
        .context("reconciling customer balances")?;

    for drift in &report.drifts {
        warn!(
            customer_id = %drift.customer_id,
            name = %drift.name,
            cached = %drift.cached,
            expected = %drift.expected,
            drift = %drift.drift,
            "balance drift"
        );
    }
    info!(
        customers = report.customers_checked,
        drifted = report.drifts.len(),
        rewritten = report.rewritten,
        "reconciliation finished"
    );
    Ok(())
}
