use rootcause::prelude::{Report, ResultExt};
use std::path::PathBuf;
use std::sync::Arc;
use tripwire_graph::MemoryGraph;
use tripwire_server::{config::ServerConfig, db::PgMetadataStore, demo, error::ServerError};
use tripwire_trigger::{InMemoryMetadataStore, MetadataStore, TriggerEngine, TriggerProcedures};

#[tokio::main]
async fn main() -> Result<(), Report<ServerError>> {
    use sqlx::postgres::PgPoolOptions;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tripwire_trigger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Optional config file as the first argument, environment on top
    let config_file = std::env::args().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_file.as_deref()).map_err(|e| ServerError::Config {
        details: e.to_string(),
    })?;
    tracing::info!(
        database = %config.database_name,
        triggers_enabled = config.trigger.enabled,
        "Loaded configuration"
    );

    let metadata: Arc<dyn MetadataStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .map_err(|e| ServerError::Database {
                    details: e.to_string(),
                })?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| ServerError::Migration {
                    details: e.to_string(),
                })?;
            Arc::new(PgMetadataStore::new(pool))
        }
        None => {
            tracing::warn!("no database_url configured, trigger definitions are not persisted");
            Arc::new(InMemoryMetadataStore::new())
        }
    };

    let graph = Arc::new(MemoryGraph::new(config.database_name.clone()));
    let engine = TriggerEngine::new(
        config.trigger.clone(),
        Arc::clone(&graph),
        Arc::new(demo::statements()),
        metadata,
    );
    engine.start().await.context(ServerError::Trigger)?;

    if engine.is_enabled() {
        let procedures = TriggerProcedures::new(engine.clone());
        demo::install(&procedures)
            .await
            .context(ServerError::Trigger)?;
        if let Err(e) = demo::run_workload(&graph).await {
            tracing::warn!(error = %e, "demo workload failed");
        }
    }

    tracing::info!("trigger engine running, press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }

    engine.stop().await;
    tracing::info!("shut down");
    Ok(())
}
