//! Cards Party Back binary entrypoint wiring REST routes, lock-guarded storage and long-polling.

use std::{env, net::SocketAddr, str::FromStr};

use anyhow::Context;
use axum::Router;
use cards_party_back::{
    config::AppConfig,
    dao::{Stores, storage::StorageError},
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the storage backend.
const BACKEND_ENV: &str = "STORAGE_BACKEND";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = match env::var(BACKEND_ENV) {
        Ok(raw) => raw.parse::<Backend>()?,
        Err(_) => Backend::Memory,
    };
    info!(?backend, container = %config.lock_container, "selected storage backend");

    let container = config.lock_container.clone();
    let app_state = AppState::new(config);

    tokio::spawn(storage_supervisor::run(app_state.clone(), move || {
        connect(backend, container.clone())
    }));
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Storage backends the binary can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Memory,
    #[cfg(feature = "couch-store")]
    Couch,
    #[cfg(feature = "mongo-store")]
    Mongo,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            #[cfg(feature = "couch-store")]
            "couch" | "couchdb" => Ok(Backend::Couch),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Ok(Backend::Mongo),
            other => anyhow::bail!("unsupported {BACKEND_ENV} value `{other}`"),
        }
    }
}

/// Open both stores on the selected backend.
async fn connect(backend: Backend, container: String) -> Result<Stores, StorageError> {
    match backend {
        Backend::Memory => Ok(Stores::in_memory(container)),
        #[cfg(feature = "couch-store")]
        Backend::Couch => {
            use cards_party_back::dao::couchdb::{CouchConfig, CouchStore};

            let config = CouchConfig::from_env()?;
            Ok(Stores::shared(CouchStore::connect(config, container).await?))
        }
        #[cfg(feature = "mongo-store")]
        Backend::Mongo => {
            use cards_party_back::dao::mongodb::{MongoConfig, MongoStore};

            let config = MongoConfig::from_env().await?;
            Ok(Stores::shared(MongoStore::connect(config, container).await?))
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
