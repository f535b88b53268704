use std::sync::Arc;

use backend::{
    config::AppConfig,
    crm::http::HttpCrmClient,
    db::Db,
    engine::Engine,
    kv::memory::MemoryKv,
    logger::init_logger,
};

/// Initializes the fast store and runs migrations.
async fn init_db(cfg: &AppConfig) -> anyhow::Result<Db> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("booking-engine", is_production);

    tracing::info!("Starting booking engine...");

    let cfg = AppConfig::from_env();

    let db = init_db(&cfg).await?;

    let crm: Arc<dyn backend::crm::CrmClient> = Arc::new(HttpCrmClient::new(
        cfg.crm_base_url.clone(),
        cfg.crm_token.clone(),
    )?);

    // Single-instance deployment: the in-process KV serves locks and cache.
    // Multi-instance deployments swap in a distributed KvStore here.
    let kv: Arc<dyn backend::kv::KvStore> = Arc::new(MemoryKv::new());

    let engine = Engine::build(&cfg, crm, kv, db.pool.clone());
    engine.start_background_jobs(&cfg);

    // The booking commands are served by the embedding host through
    // `engine.coordinator`; this binary keeps the background jobs and
    // projection workers running.
    tracing::info!("Engine started; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}
