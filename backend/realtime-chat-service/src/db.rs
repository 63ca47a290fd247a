use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{error, info};

use crate::error::AppError;

// Embedded at compile time so startup does not depend on the working directory
const MIG_0001: &str = include_str!("../migrations/0001_init.sql");

const MAX_CONNECTIONS: usize = 16;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn init_pool(database_url: &str) -> Result<Pool, AppError> {
    let pg_config: PgConfig = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(MAX_CONNECTIONS)
        .build()
        .map_err(|e| AppError::StartServer(format!("build pool: {e}")))?;

    match tokio::time::timeout(CONNECT_TIMEOUT, pool.get()).await {
        Ok(Ok(client)) => {
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| AppError::StartServer(format!("verify pool: {e}")))?;
            info!(max_connections = MAX_CONNECTIONS, "database pool created");
        }
        Ok(Err(e)) => {
            error!(error = %e, "database connection verification failed");
            return Err(AppError::StartServer(format!("connect: {e}")));
        }
        Err(_) => {
            error!(
                timeout_secs = CONNECT_TIMEOUT.as_secs(),
                "database connection verification timeout"
            );
            return Err(AppError::StartServer("database connect timeout".into()));
        }
    }

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Apply embedded migrations in order. Every statement is idempotent.
pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    for (i, sql) in [MIG_0001].into_iter().enumerate() {
        let label = i + 1;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| AppError::StartServer(format!("migration {label}: {e}")))?;
        info!(migration = %label, "chat migration applied");
    }
    Ok(())
}
