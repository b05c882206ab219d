use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{migrate::Migrator, postgres::PgPoolOptions};
use tracing::{error, info, warn};

use crate::auth::{jwt::JwtKeys, Authenticator, SessionAuthenticator};
use crate::config::{AppConfig, StoreBackend};
use crate::db::{MemoryStore, PgStore, Store};
use crate::goals::GoalService;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn Authenticator>,
    pub goals: GoalService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store: Arc<dyn Store> = match config.store_backend {
            StoreBackend::Memory => {
                warn!("using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
            StoreBackend::Postgres => {
                Arc::new(connect_postgres(&config.database_url).await?) as Arc<dyn Store>
            }
        };

        Ok(Self::from_parts(&config, store))
    }

    pub fn from_parts(config: &AppConfig, store: Arc<dyn Store>) -> Self {
        let keys = JwtKeys::from_config(&config.jwt);
        let auth = Arc::new(SessionAuthenticator::new(store.clone(), keys)) as Arc<dyn Authenticator>;
        let goals = GoalService::new(store.clone());
        Self {
            store,
            auth,
            goals,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let config = AppConfig {
            database_url: String::new(),
            store_backend: StoreBackend::Memory,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                session_ttl_minutes: 5,
            },
        };
        Self::from_parts(&config, Arc::new(MemoryStore::new()))
    }
}

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
const MIGRATION_RETRY: Duration = Duration::from_secs(5);

/// An unreachable database does not stop startup: the pool reconnects
/// lazily, migrations are retried in the background and requests fail with
/// a storage error until the schema is in place.
async fn connect_postgres(database_url: &str) -> anyhow::Result<PgStore> {
    let options = || PgPoolOptions::new().max_connections(10);
    let db = match options().connect(database_url).await {
        Ok(db) => {
            info!("connected to database");
            match MIGRATOR.run(&db).await {
                Ok(()) => return Ok(PgStore::new(db)),
                Err(e) => warn!(error = %e, "migration failed; retrying in background"),
            }
            db
        }
        Err(e) => {
            error!(error = %e, "error connecting to database; continuing with lazy pool");
            options()
                .connect_lazy(database_url)
                .context("parse DATABASE_URL")?
        }
    };

    let pool = db.clone();
    tokio::spawn(async move {
        let attempts = retry_until_ok(MIGRATION_RETRY, || MIGRATOR.run(&pool)).await;
        info!(attempts, "database migrations applied");
    });

    Ok(PgStore::new(db))
}

/// Runs `attempt` until it succeeds, sleeping `interval` between failures.
/// Returns the number of attempts made.
async fn retry_until_ok<F, Fut, E>(interval: Duration, mut attempt: F) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(()) => return attempts,
            Err(e) => {
                warn!(error = %e, attempts, "migration failed; retrying");
                tokio::time::sleep(interval).await;
            }
        }
    }
}
