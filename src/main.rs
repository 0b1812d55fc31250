//! Lotbook binary - initializes the database and runs the startup
//! reconciliation pass over the aggregate cache.
//!
//! The ledger itself is a library consumed by the transaction-management
//! layer; this binary covers the operational side: schema creation, the
//! drift report, the optional cache repair, and the legacy return repair.

use dotenvy::dotenv;
use lotbook::{
    config::{database, settings},
    core::{reconcile, returns},
    errors::Result,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Non-fatal: environment variables can be set externally
    dotenv().ok();

    let settings = settings::load_default_settings()?;
    info!(actor = %settings.actor, "settings loaded");

    let db = database::create_connection().await?;
    database::create_tables(&db).await?;
    info!("database initialized");

    let report = reconcile::reconcile(&db, None).await?;
    if report.is_clean() {
        info!(products = report.products_checked, "aggregate cache consistent");
    } else if settings.repair_on_start {
        let repaired = reconcile::repair(&db, None, &settings.actor).await?;
        info!(repaired = repaired.entries.len(), "aggregate cache repaired");
    } else {
        // Advisory only; repair must be asked for explicitly
        warn!(
            drifted = report.entries.len(),
            "aggregate cache drift detected; set repair_on_start to rebuild"
        );
    }

    let repair_report = returns::repair_unlinked_returns(&db).await?;
    if !repair_report.ambiguous.is_empty() {
        warn!(
            returns = ?repair_report.ambiguous,
            "returns with ambiguous parents need manual linking"
        );
    }

    Ok(())
}
