use actix_web::{web, App, HttpServer};
use emojigen::{
    logger::{self, LoggerConfig},
    server::{configure_routes, AppState},
    Config, GalleryStoreManager, Orchestrator, ReplicateClient,
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_loaded = dotenv::dotenv().is_ok();
    logger::init_with_config(LoggerConfig::from_env())?;

    if env_loaded {
        log::info!("✅ .env file loaded successfully");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let config = Config::from_env();
    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), config.port());
    logger::log_config_info(&config);

    let client = match ReplicateClient::new(&config.replicate) {
        Ok(client) => client,
        Err(e) => {
            log::error!("❌ {}", e);
            return Err(e.into());
        }
    };
    let generator = Orchestrator::new(Arc::new(client), &config.replicate);

    log::info!("🔄 Connecting gallery store...");
    let store = match GalleryStoreManager::new(&config).await {
        Ok(store) => {
            log::info!("✅ Gallery store ready ({})", store.backend_name());
            store
        }
        Err(e) => {
            log::error!("❌ Failed to initialize gallery store: {}", e);
            return Err(e.into());
        }
    };

    let state = web::Data::new(AppState::new(Arc::new(generator), Arc::new(store)));
    let bind_address = format!("0.0.0.0:{}", config.port());
    log::info!("🌐 Listening on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    log::info!("👋 Server stopped");
    Ok(())
}
