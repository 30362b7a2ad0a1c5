use std::net::SocketAddr;
use std::sync::Arc;

use libra_works::api::{self, AppState};
use libra_works::audit::Auditor;
use libra_works::config::AppConfig;
use libra_works::events::EventBus;
use libra_works::identity::IdentityVerifier;
use libra_works::metrics::Metrics;
use libra_works::store::{MemoryStore, RedisStore, WorkStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = AppConfig::from_env()?;

    let store = match &cfg.redis_url {
        Some(url) => {
            let redis = RedisStore::new(url)?;
            redis.ping().await?;
            tracing::info!("using redis work store");
            WorkStore::new(redis)
        }
        None => {
            tracing::warn!("LIBRA_REDIS_URL not set; works are kept in memory only");
            WorkStore::new(MemoryStore::new())
        }
    };

    let bus = EventBus::from_config(&cfg.bus)?;
    let auditor = Auditor::new(Arc::new(bus.clone()));

    if cfg.jwt_secret.is_none() {
        tracing::warn!("LIBRA_JWT_SECRET not set; every caller is anonymous");
    }

    let state = AppState {
        store,
        bus,
        auditor,
        identity: IdentityVerifier::new(cfg.jwt_secret.clone()),
        trusted: cfg.trusted_networks.clone(),
        metrics: Metrics::new()?,
        namespaces: cfg.namespaces.clone(),
    };

    let app = api::router(state);

    let listen_addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    tracing::info!(
        %listen_addr,
        trusted_networks = cfg.trusted_networks.len(),
        etd = %cfg.namespaces.etd,
        oa = %cfg.namespaces.oa,
        "starting libra works service"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("libra works exited cleanly");

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LIBRA_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term_signal) => term_signal.recv().await,
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                None
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
