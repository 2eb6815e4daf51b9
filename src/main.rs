use clap::Parser;
use image_gateway::{build_router, AppState, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "image-gateway",
    about = "Image-generation gateway for OpenAI, Anthropic and Google clients",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. image-gateway.toml (current directory)");
        println!("  2. $XDG_CONFIG_HOME/image-gateway/config.toml");
        println!("     ~/.config/image-gateway/config.toml");
        println!("  3. ~/.image-gateway.toml");
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    config.validate()?;

    info!("image-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:      {}", config.backend.base_url);
    info!("  Models:       {}", config.backend.models.join(", "));
    info!("  Aliases:      {}", config.models.len());
    info!("  Timeout:      {}s", config.backend.timeout_secs);
    info!("  Concurrency:  {}", config.backend.max_concurrency);

    // The dispatcher enforces its own deadline; this only bounds connection setup.
    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, client)?);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  POST /v1/images/generations                 (OpenAI)");
    info!("  POST /v1/messages                           (Anthropic)");
    info!("  POST /v1beta/models/{{model}}:generateContent (Google)");

    axum::serve(listener, app).await?;

    Ok(())
}
