use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use lab_core::{
    CoreConfig, Database,
    config::{clinic_name_from_env_value, database_url_from_env_value, max_connections_from_env_value},
};

/// Main entry point for the lab backend
///
/// Resolves configuration once, opens (and migrates) the database and serves
/// the REST API with Swagger UI at `/swagger-ui`.
///
/// # Environment Variables
/// - `DATABASE_URL`: SQLite URL (default: "sqlite://lab.db")
/// - `LAB_DB_MAX_CONNECTIONS`: pool size, 1 to 64 (default: 5)
/// - `LAB_CLINIC_NAME`: letterhead printed on receipts and reports
/// - `LAB_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - a configuration value is invalid,
/// - the database cannot be opened or migrated, or
/// - the server address cannot be bound.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lab=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("LAB_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(CoreConfig::new(
        database_url_from_env_value(std::env::var("DATABASE_URL").ok()),
        max_connections_from_env_value(std::env::var("LAB_DB_MAX_CONNECTIONS").ok())?,
        clinic_name_from_env_value(std::env::var("LAB_CLINIC_NAME").ok())?,
    )?);

    let db = Database::connect(&cfg).await?;

    tracing::info!("++ Starting lab REST on {}", rest_addr);

    let app = router(AppState::new(cfg, db));
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
