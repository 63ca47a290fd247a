use crypto_core::{DEFAULT_ITERATIONS, MIN_ITERATIONS};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "wedlink-dev-jwt-secret-do-not-use-in-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Production,
    Development,
}

impl AppEnv {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => AppEnv::Production,
            _ => AppEnv::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub port: u16,
    /// Absent means the in-memory store is used.
    pub database_url: Option<String>,
    /// 64 hex chars; resolved into a `MasterSecret` at startup.
    pub master_secret: Option<String>,
    pub jwt_secret: String,
    pub audit_max_entries_per_actor: usize,
    pub message_max_length: usize,
    pub message_page_max: i64,
    pub reminder_delay: Duration,
    pub typing_timeout: Duration,
    pub collaborator_timeout: Duration,
    pub key_derivation_iterations: u32,
    pub audit_prune_interval: Duration,
}

impl Config {
    fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
        env::var(key)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();

        let app_env = AppEnv::parse(&env::var("APP_ENV").unwrap_or_default());
        let production = app_env == AppEnv::Production;

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
        let master_secret = env::var("CHAT_MASTER_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let jwt_secret = match env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if production => {
                return Err(crate::error::AppError::Config("JWT_SECRET missing".into()))
            }
            None => {
                tracing::warn!("JWT_SECRET not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let key_derivation_iterations =
            Self::parse_or("KEY_DERIVATION_ITERATIONS", DEFAULT_ITERATIONS);
        if key_derivation_iterations < MIN_ITERATIONS {
            return Err(crate::error::AppError::Config(format!(
                "KEY_DERIVATION_ITERATIONS must be at least {MIN_ITERATIONS}"
            )));
        }

        Ok(Self {
            app_env,
            port: Self::parse_or("PORT", 3000),
            database_url,
            master_secret,
            jwt_secret,
            audit_max_entries_per_actor: Self::parse_or("AUDIT_MAX_ENTRIES_PER_ACTOR", 10_000),
            message_max_length: Self::parse_or("MESSAGE_MAX_LENGTH", 10_000),
            message_page_max: Self::parse_or("MESSAGE_PAGE_MAX", 100),
            reminder_delay: Duration::from_secs(Self::parse_or("REMINDER_DELAY_SECS", 3600)),
            typing_timeout: Duration::from_secs(Self::parse_or("TYPING_TIMEOUT_SECS", 5)),
            collaborator_timeout: Duration::from_millis(Self::parse_or(
                "COLLABORATOR_TIMEOUT_MS",
                5000,
            )),
            key_derivation_iterations,
            audit_prune_interval: Duration::from_secs(Self::parse_or(
                "AUDIT_PRUNE_INTERVAL_SECS",
                600,
            )),
        })
    }

    /// Development defaults with an in-memory store. Used by tests and local
    /// tooling that never touches the environment.
    pub fn development() -> Self {
        Self {
            app_env: AppEnv::Development,
            port: 3000,
            database_url: None,
            master_secret: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            audit_max_entries_per_actor: 10_000,
            message_max_length: 10_000,
            message_page_max: 100,
            reminder_delay: Duration::from_secs(3600),
            typing_timeout: Duration::from_secs(5),
            collaborator_timeout: Duration::from_millis(5000),
            key_derivation_iterations: DEFAULT_ITERATIONS,
            audit_prune_interval: Duration::from_secs(600),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }
}
