use std::sync::Arc;

use sketchsync::config::SyncConfig;
use sketchsync::store::memory::MemoryStore;
use sketchsync::store::postgres::PgStore;
use sketchsync::store::{DocumentStore, IdentityVerifier};
use sketchsync::{db, routes, state};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = SyncConfig::from_env();
    let port = config.port;

    let (store, identities): (Arc<dyn DocumentStore>, Arc<dyn IdentityVerifier>) = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::init_pool(database_url, config.db_max_connections)
                .await
                .expect("database init failed");
            let store = Arc::new(PgStore::new(pool));
            let documents: Arc<dyn DocumentStore> = store.clone();
            (documents, store as Arc<dyn IdentityVerifier>)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; canvases live in memory only");
            let store = Arc::new(MemoryStore::new());
            for (token, identity) in &config.dev_tokens {
                store.register_token(token, identity).await;
            }
            let documents: Arc<dyn DocumentStore> = store.clone();
            (documents, store as Arc<dyn IdentityVerifier>)
        }
    };

    let state = state::AppState::new(store, identities, config);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "sketchsync listening");
    axum::serve(listener, app).await.expect("server failed");
}
