//! Planning poker backend entrypoint wiring the session store, REST and SSE layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "couch-store")]
use planning_poker_back::dao::session_store::couchdb::{CouchConfig, CouchSessionStore};
#[cfg(feature = "mongo-store")]
use planning_poker_back::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};
use planning_poker_back::{
    config::AppConfig,
    dao::{
        session_store::{SessionStore, memory::MemorySessionStore},
        storage::StorageError,
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

/// Document store selected through `SESSION_STORE`.
#[derive(Clone)]
enum Backend {
    /// Process-local store; created once so reconnects keep the data.
    Memory(Arc<dyn SessionStore>),
    #[cfg(feature = "couch-store")]
    Couch,
    #[cfg(feature = "mongo-store")]
    Mongo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = select_backend()?;
    let app_state = AppState::new(config);

    tokio::spawn(storage_supervisor::run(app_state.clone(), move || {
        connect_store(backend.clone())
    }));
    let app = build_router(app_state);

    let port = env::var("PORT")
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

fn select_backend() -> anyhow::Result<Backend> {
    let raw = env::var("SESSION_STORE").unwrap_or_else(|_| "memory".into());
    let backend = match raw.trim().to_ascii_lowercase().as_str() {
        "memory" => {
            warn!("using the in-memory session store; sessions are lost on restart");
            Backend::Memory(Arc::new(MemorySessionStore::new()))
        }
        #[cfg(feature = "couch-store")]
        "couch" | "couchdb" => Backend::Couch,
        #[cfg(feature = "mongo-store")]
        "mongo" | "mongodb" => Backend::Mongo,
        other => bail!("unsupported SESSION_STORE `{other}`"),
    };
    Ok(backend)
}

async fn connect_store(backend: Backend) -> Result<Arc<dyn SessionStore>, StorageError> {
    match backend {
        Backend::Memory(store) => Ok(store),
        #[cfg(feature = "couch-store")]
        Backend::Couch => {
            let store: Arc<dyn SessionStore> =
                Arc::new(CouchSessionStore::connect(CouchConfig::from_env()?).await?);
            Ok(store)
        }
        #[cfg(feature = "mongo-store")]
        Backend::Mongo => {
            let config = MongoConfig::from_env().await?;
            let store: Arc<dyn SessionStore> = Arc::new(MongoSessionStore::connect(config).await?);
            Ok(store)
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
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
