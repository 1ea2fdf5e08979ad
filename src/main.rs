use actix_web::{web, App, HttpServer};
use anyhow::Context;
use fellowship_relay::{
    handlers::{fellowship, health::health_check, status::{metrics_handler, status_handler}},
    settings::Settings,
    AppState,
};
use tracing::info;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env().context("invalid server settings")?;

    info!("Starting Fellowship Relay");

    let app_state = AppState::new(settings.clone());
    let fellowship_handle = app_state.fellowship.clone();

    info!(
        "Server starting on {}:{}",
        settings.server_host, settings.server_port
    );

    let server_state = app_state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(health_check))
            .route("/status", web::get().to(status_handler))
            .route("/metrics", web::get().to(metrics_handler))
            .configure(fellowship::configure)
    })
    .workers(settings.http_workers)
    .keep_alive(std::time::Duration::from_secs(30))
    // Long-polls stay open up to the poll timeout; only the request head is bounded here.
    .client_request_timeout(std::time::Duration::from_secs(5))
    .bind((settings.server_host.as_str(), settings.server_port))
    .with_context(|| {
        format!(
            "failed to bind {}:{}",
            settings.server_host, settings.server_port
        )
    })?
    .run()
    .await?;

    info!("HTTP server stopped; draining fellowship coordinator");
    fellowship_handle.shutdown().await;

    Ok(())
}
