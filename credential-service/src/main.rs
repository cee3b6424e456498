//! Credential maintenance daemon: applies migrations, serves a health check
//! and sweeps expired sessions until shutdown.

use credential_service::{
    cache::{CacheStore, RedisCache},
    config::AuthConfig,
    db,
    services::{
        oauth::providers_from_config, GovernorRateLimiter, LogMailSender, MailSender,
        MembershipRoles, NoLockout, SmtpMailSender,
    },
    store::{PgCredentialStore, PgUserDirectory},
    AppState, Backends, CoreSettings,
};
use service_core::axum::{extract::State, routing::get, Json, Router};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

#[derive(Clone)]
struct HealthState {
    pool: PgPool,
    cache: Option<Arc<dyn CacheStore>>,
    config: Arc<AuthConfig>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting credential service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    let cache: Option<Arc<dyn CacheStore>> = match &config.redis {
        Some(redis) => Some(Arc::new(RedisCache::connect(redis).await.map_err(|e| {
            tracing::error!(error = %e, "Redis unavailable");
            AppError::ServiceUnavailable
        })?)),
        None => {
            tracing::info!("Redis not configured; using in-process cache");
            None
        }
    };

    let mail: Arc<dyn MailSender> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailSender::new(smtp)?),
        None => Arc::new(LogMailSender),
    };

    let oauth_providers = providers_from_config(&config.oauth)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    tracing::info!(count = oauth_providers.len(), "OAuth providers configured");

    let backends = Backends {
        store: Arc::new(PgCredentialStore::new(pool.clone())),
        users: Arc::new(PgUserDirectory::new(pool.clone())),
        cache: cache.clone(),
        mail,
        lockout: Arc::new(NoLockout),
        roles: Arc::new(MembershipRoles::new()),
        rate_limiter: Arc::new(GovernorRateLimiter::new()),
        oauth_providers,
    };
    let state = AppState::build(backends, &CoreSettings::from(&config))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweep_sessions(
        state.clone(),
        Duration::from_secs(config.session.cleanup_interval_seconds),
        shutdown_rx,
    ));

    let config = Arc::new(config);
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(HealthState {
            pool,
            cache,
            config: config.clone(),
        });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Session sweeper panicked");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn sweep_sessions(state: AppState, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.auth.cleanup_expired_sessions().await {
                    tracing::error!(error = %e, "Expired session sweep failed");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("Session sweeper stopping");
                return;
            }
        }
    }
}

async fn health_check(
    State(state): State<HealthState>,
) -> Result<Json<serde_json::Value>, AppError> {
    db::health_check(&state.pool).await.map_err(|e| {
        tracing::error!(error = %e, "PostgreSQL health check failed");
        AppError::ServiceUnavailable
    })?;

    if let Some(cache) = &state.cache {
        cache.health_check().await.map_err(|e| {
            tracing::error!(error = %e, "Redis health check failed");
            AppError::ServiceUnavailable
        })?;
    }

    let cache_status = if state.cache.is_some() { "up" } else { "in-process" };
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up",
            "cache": cache_status,
        }
    })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
