use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use oct_backend::analysis::remote::RemoteAnalyzer;
use oct_backend::analysis::service::AnalysisService;
use oct_backend::config::AppConfig;
use oct_backend::routes::{configure_routes, cors_policy};
use oct_backend::storage::upload_store::{ensure_directories, UploadStore};
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    ensure_directories(&config.storage_dirs()).map_err(|e| {
        log::error!("Failed to create storage directories: {}", e);
        e
    })?;

    let analyzer = RemoteAnalyzer::new(
        config.model_server_url.clone(),
        config.segmentation_url.clone(),
        config.model_timeout,
    )
    .map_err(|e| std::io::Error::other(format!("Analyzer setup failed: {}", e)))?;

    log::info!("Classifier endpoint: {}", config.model_server_url);
    match &config.segmentation_url {
        Some(url) => log::info!("Segmentation endpoint: {}", url),
        None => log::warn!("SEGMENTATION_URL not set; /mask serves existing overlays only"),
    }
    if let Some(base) = &config.server_base_url {
        log::info!("Public base URL: {}", base);
    }

    let store = UploadStore::new(config.upload_folder.clone(), config.max_content_length);
    let analysis = AnalysisService::new(Arc::new(analyzer), config.analysis.clone());
    let bind_address = ("0.0.0.0", config.port);
    let config = web::Data::new(config);

    log::info!("Starting server on {}:{}", bind_address.0, bind_address.1);

    HttpServer::new(move || {
        App::new()
            .wrap(cors_policy())
            .wrap(Logger::default())
            .app_data(config.clone())
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(analysis.clone()))
            .configure(|cfg| configure_routes(cfg, config.results_folder.clone()))
    })
    .bind(bind_address)?
    .run()
    .await
}
