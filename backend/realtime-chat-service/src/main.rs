use actix_web::{web, App, HttpServer};
use crypto_core::load_master_secret;
use realtime_chat_service::{
    collaborators::Collaborators,
    config, db, error, logging, routes,
    services::spawn_audit_pruner,
    state::AppState,
    storage::{ChatStore, MemoryStore, PgStore},
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let master = load_master_secret(cfg.master_secret.as_deref(), cfg.is_production())
        .map_err(|e| error::AppError::Config(format!("CHAT_MASTER_SECRET: {e}")))?;

    let store: Arc<dyn ChatStore> = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url).await?;
            Arc::new(PgStore::new(pool))
        }
        None if cfg.is_production() => {
            return Err(error::AppError::Config(
                "DATABASE_URL is required in production".into(),
            ));
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let collaborators = Collaborators::process_local(store.clone());
    let state = AppState::new(cfg.clone(), store, collaborators, master);

    let _pruner = spawn_audit_pruner(state.audit.clone(), cfg.audit_prune_interval);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting realtime-chat-service");

    let rest_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(web::Data::new(rest_state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}
