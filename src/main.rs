mod config;
mod db;
mod error;
mod extract;
mod handlers;
mod media;
mod middleware;
mod models;
mod services;
mod storage;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::storage::Storage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub storage: Storage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "family_album=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting family album server...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let storage = Storage::from_config(&config)?;
    tracing::info!("Object store: {}", storage.provider.storage_type());

    let state = AppState {
        db,
        config: config.clone(),
        storage,
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no session; blob routes carry their own signature)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route(
            "/blob/*key",
            get(handlers::blob::get_blob).put(handlers::blob::put_blob),
        );

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/me", get(handlers::auth::me))
        // Uploads
        .route("/uploads/init", post(handlers::upload::init_upload))
        .route("/uploads/complete", post(handlers::upload::complete_upload))
        // Photos
        .route("/photos", get(handlers::photo::list_photos))
        .route(
            "/photos/:id",
            get(handlers::photo::get_photo)
                .patch(handlers::photo::update_photo)
                .delete(handlers::photo::delete_photo),
        )
        .route("/photos/:id/url", get(handlers::photo::photo_url))
        // Albums
        .route(
            "/albums",
            get(handlers::album::list_albums).post(handlers::album::create_album),
        )
        .route(
            "/albums/:id",
            get(handlers::album::get_album)
                .patch(handlers::album::update_album)
                .delete(handlers::album::delete_album),
        )
        .route(
            "/albums/:id/photos",
            get(handlers::album::list_album_photos).post(handlers::album::add_photos),
        )
        .route(
            "/albums/:id/photos/:photo_id",
            delete(handlers::album::remove_photo),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
