//! # Rapline Binary
//!
//! The entry point that assembles the application based on compile-time features.

mod config;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use rl_api::{configure_routes, middleware, AppState};

// Feature-gated imports: each port is filled by whichever plugin is compiled in
#[cfg(feature = "db-sqlite")]
use rl_db_sqlite::SqliteDocumentStore;

#[cfg(feature = "storage-local")]
use rl_storage_local::LocalMediaStore;

#[cfg(feature = "auth-simple")]
use rl_auth_simple::SimpleAuthProvider;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = config::Settings::from_env()?;

    // 1. Open the shared document store; no store, no service
    #[cfg(feature = "db-sqlite")]
    let store = SqliteDocumentStore::new(&settings.database_url)
        .await
        .with_context(|| format!("failed to open document store at {}", settings.database_url))?;

    // 2. Initialize Upload Storage
    #[cfg(feature = "storage-local")]
    let media = LocalMediaStore::open(settings.upload_dir.clone(), settings.max_upload_bytes)
        .await
        .with_context(|| format!("failed to prepare upload dir {}", settings.upload_dir.display()))?;

    // 3. Initialize Auth Implementation
    #[cfg(feature = "auth-simple")]
    let auth = SimpleAuthProvider::new();

    // 4. Wrap in AppState (Using dynamic dispatch for maximum flexibility)
    let state = web::Data::new(AppState {
        store: Box::new(store),
        media: Box::new(media),
        auth: Box::new(auth),
        store_timeout: settings.store_timeout,
    });

    log::info!("🎤 Rapline starting on http://{}", settings.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::cors_policy())
            .wrap(middleware::standard_middleware())
            .configure(configure_routes)
    })
    .bind(&settings.bind_addr)
    .with_context(|| format!("failed to bind {}", settings.bind_addr))?
    .run()
    .await?;

    Ok(())
}
