//! Anoima gateway: JSON routes over the sharded person directory.
//!
//! Loads `.env`, then `AnoimaConfig` (file + `ANOIMA__*` env), opens the global store and every
//! shard, and serves on 127.0.0.1:{port}. Stores are flushed on Ctrl+C.

mod auth;
mod handlers;

use anoima_core::{Anoima, AnoimaConfig};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use handlers::{bookmarks, maintenance, persons};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
pub(crate) struct AppState {
    pub core: Arc<Anoima>,
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(maintenance::health))
        .route(
            "/api/persons",
            get(persons::list_persons).post(persons::create_person),
        )
        .route("/api/persons/random", get(persons::random_persons))
        .route(
            "/api/persons/:key",
            get(persons::get_person)
                .put(persons::update_person)
                .delete(persons::delete_person),
        )
        .route("/api/persons/:key/information", post(persons::add_information))
        .route(
            "/api/persons/:key/information/:id",
            get(persons::get_information).delete(persons::delete_information),
        )
        .route(
            "/api/persons/:key/information/:id/comments",
            post(persons::add_information_comment),
        )
        .route(
            "/api/persons/:key/information/:id/votes",
            post(persons::cast_vote),
        )
        .route("/api/persons/:key/comments", post(persons::add_comment))
        .route(
            "/api/persons/:key/comments/:id",
            axum::routing::delete(persons::delete_comment),
        )
        .route(
            "/api/persons/:key/bookmark",
            post(bookmarks::add_bookmark).delete(bookmarks::remove_bookmark),
        )
        .route("/api/bookmarks", get(bookmarks::list_bookmarks))
        .route("/api/maintenance/orphans", get(maintenance::orphans))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[anoima-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AnoimaConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(target: "anoima::gateway", error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let app_name = config.app_name.clone();

    let core = match Anoima::open(config) {
        Ok(core) => Arc::new(core),
        Err(e) => {
            tracing::error!(target: "anoima::gateway", error = %e, "failed to open stores");
            std::process::exit(1);
        }
    };
    if core.config.admin_api_key.is_none() {
        tracing::warn!(
            target: "anoima::gateway",
            "ANOIMA__ADMIN_API_KEY not set; admin routes are closed"
        );
    }

    let app = build_app(AppState {
        core: Arc::clone(&core),
    });

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(target: "anoima::gateway", %addr, error = %e, "bind failed");
            std::process::exit(1);
        }
    };
    tracing::info!(
        target: "anoima::gateway",
        %addr,
        shards = core.shards.shard_count(),
        "{} listening",
        app_name
    );

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(target: "anoima::gateway", error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "anoima::gateway", "shutdown requested");
        }
    }

    if let Err(e) = core.flush() {
        tracing::warn!(target: "anoima::gateway", error = %e, "flush on shutdown failed");
    }
}
