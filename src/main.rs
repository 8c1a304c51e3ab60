use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canvas_sync::api::router;
use canvas_sync::canvas::CanvasHttpClient;
use canvas_sync::config::AppConfig;
use canvas_sync::services::{JobEngine, JobReaper};
use canvas_sync::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let canvas = CanvasHttpClient::new(config.canvas.clone())?;
    let auth_strategy = canvas.auth_strategy();
    info!("credential strategy: {:?}", auth_strategy);

    let jobs = JobEngine::new(
        pool.clone(),
        Arc::new(canvas),
        config.canvas.fetch_concurrency,
        config.jobs.clone(),
    );

    let reaper = JobReaper::new(
        jobs.registry().clone(),
        config.jobs.job_ttl,
        config.jobs.reap_interval,
    );
    tokio::spawn(reaper.start());

    let state = AppState {
        db: pool.clone(),
        jobs,
        auth_strategy,
    };

    let app = router(state);

    info!("listening on http://{}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
