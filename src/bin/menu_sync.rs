//! Runs one full menu reconciliation pass against the POS and exits.

use anyhow::Context;
use pos_reconciler::{db, logging, Config, HttpPosClient, MenuReconciler};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("load configuration")?;
    let _guard = logging::init(&config.log);

    info!(
        "Starting menu sync v{} ({})",
        env!("CARGO_PKG_VERSION"),
        pos_reconciler::BUILD_GIT_SHA
    );

    let db = Arc::new(db::init(&config.database_path).context("open database")?);
    let pos = Arc::new(HttpPosClient::new(&config.pos).context("create POS client")?);
    let reconciler = MenuReconciler::new(db, pos).force_writes(config.force_menu_writes);

    match reconciler.sync_all_menus().await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "menu sync failed");
            Err(e.into())
        }
    }
}
