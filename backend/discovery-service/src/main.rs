use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use discovery_service::handlers::register_routes;
use discovery_service::services::CatalogSource;
use discovery_service::{Config, RecommendationEngine, StaticCatalog};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,discovery_service=debug".into());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting discovery-service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    info!("Configuration loaded and validated");

    let catalog: Arc<dyn CatalogSource> = match config.service.catalog_fixture_path.as_deref() {
        Some(path) => {
            let catalog = StaticCatalog::from_file(path)
                .with_context(|| format!("Failed to load catalog fixture {}", path))?;
            info!(tracks = catalog.len(), "Static catalog loaded from {}", path);
            Arc::new(catalog)
        }
        None => {
            warn!("No catalog fixture configured, serving an empty catalog");
            Arc::new(StaticCatalog::default())
        }
    };

    let engine = RecommendationEngine::new(config.engine.clone(), catalog)
        .context("Failed to initialize recommendation engine")?;
    let engine = web::Data::new(Arc::new(engine));

    let host = config.service.http_host.clone();
    let port = config.service.http_port;
    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .configure(register_routes)
    })
    .bind((host.as_str(), port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error")
}
