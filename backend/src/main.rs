use axum::Router;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use halfway::{
    AppState, Config, Stores, get_db_pool, handlers,
    constants::MEET_SWEEP_INTERVAL_SECS,
    db::DatabaseConfig,
    services::OverpassVenueSearch,
    utils,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tower_http::cors::{Any, CorsLayer};

#[derive(Parser, Debug)]
#[command(name = "server", about = "Proximity matching and live coordination server")]
struct Args {
    /// Overrides PORT
    #[arg(long)]
    port: Option<u16>,

    /// Use in-memory stores even when DATABASE_URL is set
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let stores = match config.database_url.clone() {
        Some(url) if !args.in_memory => {
            let pool = get_db_pool(&DatabaseConfig::with_url(url)).await?;
            halfway::db::migrations::run_migrations(&pool).await?;
            tracing::info!("Using Postgres stores");
            Stores::postgres(pool)
        }
        _ => {
            tracing::warn!("Using in-memory stores; nothing survives a restart");
            Stores::in_memory()
        }
    };

    let venues = Arc::new(OverpassVenueSearch::new(config.overpass_url.clone())?);
    let state = AppState::new(config.clone(), stores, venues);

    spawn_meet_sweeper(state.clone());

    let port = config.port;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Server running on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    handlers::routes(state).layer(create_cors_layer())
}

/// Expires idle meet sessions and drops stale pair locks and cooldown stamps
fn spawn_meet_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(MEET_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            state.meet.sweep_expired().await;
            state.relationships.prune_cooldowns();
        }
    });
}

fn create_cors_layer() -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    // Comma-separated list; permissive when unset or unparsable
    if let Ok(cors_origins) = std::env::var("ALLOWED_ORIGINS") {
        let origins: Vec<HeaderValue> = cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .filter_map(|origin| origin.parse().ok())
            .collect();

        if !origins.is_empty() {
            cors = cors.allow_origin(origins);
        } else {
            cors = cors.allow_origin(Any);
        }
    } else {
        cors = cors.allow_origin(Any);
    }

    cors
}
