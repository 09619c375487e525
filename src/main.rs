mod cache;
mod config;
mod error;
mod frame;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use store::Stores;
use store::memory::{
    MemoryBoardStore, MemoryChatLog, MemoryHistoryLog, MemoryNotificationStore, MemorySessionVerifier,
};
use store::postgres::{
    PgBoardStore, PgChatLog, PgHistoryLog, PgNotificationStore, PgSessionVerifier, init_pool,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env();
    let port = config.port;

    // Postgres when DATABASE_URL is set; memory stores otherwise.
    let stores = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = init_pool(&database_url).await.expect("database init failed");
            tracing::info!("using postgres stores");
            Stores {
                sessions: Arc::new(PgSessionVerifier::new(pool.clone())),
                boards: Arc::new(PgBoardStore::new(pool.clone())),
                history: Arc::new(PgHistoryLog::new(pool.clone())),
                chat: Arc::new(PgChatLog::new(pool.clone())),
                notifications: Arc::new(PgNotificationStore::new(pool)),
            }
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set — using in-memory stores, state is lost on restart");
            Stores {
                sessions: Arc::new(MemorySessionVerifier::new()),
                boards: Arc::new(MemoryBoardStore::new()),
                history: Arc::new(MemoryHistoryLog::new()),
                chat: Arc::new(MemoryChatLog::new()),
                notifications: Arc::new(MemoryNotificationStore::new()),
            }
        }
    };

    tracing::info!(mode = config.mode.as_str(), "board sync engine starting");

    let state = state::AppState::new(stores, config);
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "bingoboard listening");
    axum::serve(listener, app).await.expect("server failed");
}
