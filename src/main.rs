#[cfg(feature = "web-server")]
use smartplate::web::server::create_router;

use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;

use smartplate::config::Config;
use smartplate::handlers::AnalysisHandler;
use smartplate::services::GeminiService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env first so RUST_LOG from it is honoured
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    log::info!("🚀 Starting SmartPlate AI...");

    let config = Config::from_env().context("failed to load configuration")?;

    let gemini = GeminiService::with_base_url(
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
    );
    log::info!("✅ Gemini service initialized with model: {}", gemini.model());

    let handler = Arc::new(AnalysisHandler::new(Arc::new(gemini), config.retry.clone()));
    log::info!(
        "✅ Analysis handler initialized (max {} attempts, backoff {:?}, quota markers {:?})",
        config.retry.max_attempts(),
        config.retry.backoff(),
        config.retry.matcher().markers()
    );

    #[cfg(feature = "web-server")]
    {
        let app = create_router(handler, config.max_image_bytes, &config.static_dir);

        let listener = tokio::net::TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.listen_addr))?;

        log::info!("🌐 SmartPlate UI: http://{}", config.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                log::info!("🛑 Shutting down...");
            })
            .await
            .context("web server failed")?;
    }

    #[cfg(not(feature = "web-server"))]
    {
        let _ = handler;
        log::warn!("⚠️ Built without the web-server feature; nothing to serve");
    }

    Ok(())
}
