mod prune;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use nutri_api::analyzer::Analyzer;
use nutri_api::auth::{self, AppState, AppStateInner};
use nutri_api::middleware::{require_admin, require_auth};
use nutri_api::{analysis, subscriptions, tickets, version};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutri=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("NUTRI_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("NUTRI_DB_PATH").unwrap_or_else(|_| "nutri.db".into());
    let host = std::env::var("NUTRI_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("NUTRI_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let daily_free_limit: i64 = std::env::var("NUTRI_DAILY_FREE_LIMIT")
        .unwrap_or_else(|_| "2".into())
        .parse()?;
    let retention_days: i64 = std::env::var("NUTRI_COUNTER_RETENTION_DAYS")
        .unwrap_or_else(|_| "30".into())
        .parse()?;
    let analysis_url = std::env::var("NUTRI_ANALYSIS_URL")
        .unwrap_or_else(|_| "http://localhost:8800".into());
    let analysis_key = std::env::var("NUTRI_ANALYSIS_KEY").unwrap_or_default();

    // Init database
    let db = nutri_db::Database::open(&PathBuf::from(&db_path))?;

    let analyzer = Analyzer::new(analysis_url, analysis_key)?;

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        daily_free_limit,
        analyzer,
    });

    // Stale free-tier counters are pruned in the background
    tokio::spawn(prune::run_prune_loop(app_state.clone(), retention_days));

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/app-version/check", get(version::check_version))
        .with_state(app_state.clone());

    let user_routes = Router::new()
        .route("/analysis/food", post(analysis::analyze_food))
        .route("/analysis/description", post(analysis::analyze_description))
        .route("/analysis/quota", get(analysis::get_quota))
        .route("/tickets", post(tickets::create_ticket))
        .route("/tickets", get(tickets::list_my_tickets))
        .route("/tickets/unread-count", get(tickets::my_unread_count))
        .route("/tickets/{id}", get(tickets::get_ticket))
        .route("/tickets/{id}/messages", post(tickets::add_message))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state.clone());

    let admin_routes = Router::new()
        .route("/admin/versions", get(version::list_versions))
        .route("/admin/versions", post(version::create_version))
        .route("/admin/versions/{id}", get(version::get_version))
        .route("/admin/versions/{id}", put(version::update_version))
        .route("/admin/versions/{id}", delete(version::delete_version))
        .route(
            "/admin/versions/{id}/toggle-active",
            patch(version::toggle_version_active),
        )
        .route("/admin/tickets", get(tickets::admin_list_tickets))
        .route("/admin/tickets/stats", get(tickets::get_statistics))
        .route("/admin/tickets/unread-count", get(tickets::admin_unread_count))
        .route("/admin/tickets/{id}/status", patch(tickets::update_status))
        .route("/admin/tickets/{id}/priority", patch(tickets::update_priority))
        .route("/admin/tickets/{id}", delete(tickets::delete_ticket))
        .route("/admin/subscriptions", post(subscriptions::grant_subscription))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Nutri server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
