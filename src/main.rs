mod chat_client;
mod config;
mod densenet;
mod engine;
mod error;
mod hub;
mod model_service;
mod preprocess;
mod prompt;
mod provider;
mod routes;
mod types;

use axum::{http::HeaderValue, routing::get};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use chat_client::ChatClient;
use config::{Config, CorsOrigins};
use hub::HubFetcher;
use model_service::ModelService;
use routes::AppState;

fn cors_layer(origins: CorsOrigins) -> CorsLayer {
    let allow_origin = match origins {
        CorsOrigins::Any => AllowOrigin::any(),
        CorsOrigins::List(list) => AllowOrigin::list(
            list.iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin, "Skipping invalid CORS origin");
                        None
                    }
                }),
        ),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cardiac_mri_server=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!(
        model_repo = %config.model_repo,
        model_file = %config.model_file,
        image_size = config.image_size,
        threshold_override = ?config.optimal_threshold,
        cpu_only = config.cpu_only,
        "Starting cardiac MRI server"
    );

    let device = ModelService::device(config.cpu_only)?;
    let fetcher = HubFetcher::new(&config.model_repo, config.hf_token.clone())?;
    let model_service = Arc::new(ModelService::new(
        config.model_config(),
        device,
        Arc::new(fetcher),
        config.optimal_threshold.clone(),
    ));

    if config.preload {
        let warm = model_service.clone();
        tokio::spawn(async move {
            tracing::info!("Preloading model");
            if let Err(e) = warm.warm_up().await {
                tracing::error!(error = ?e, "Model preload failed, will retry on first request");
            }
        });
    }

    let chat = Arc::new(ChatClient::new(config.generation_params()));
    let state = AppState::new(model_service, chat);

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = routes::router(state, config.max_upload_bytes())
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(cors_layer(config.parse_cors_origins()))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}
