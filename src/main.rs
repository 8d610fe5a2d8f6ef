use account_coordinator::{config::ServerConfig, server, AppContext, ServiceResult};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ServiceResult<()> {
    // Loads .env before reading anything
    let config = ServerConfig::from_env()?;
    init_logging(&config);

    let ctx = AppContext::new(config).await?;
    ctx.start_background_tasks();

    let result = server::serve(ctx.clone()).await;

    ctx.shutdown().await;
    if let Err(ref e) = result {
        tracing::error!(error = %e, "Server exited with error");
    }
    info!("Account coordinator stopped");

    result
}

fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("account_coordinator=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
