use clap::Parser;
use deployment_proxy::{build_router, AppState, ProxyConfig, SharedLogger, UpstreamDispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "deployment-proxy",
    about = "OpenAI-compatible chat completions proxy for deployment-addressed upstreams",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Log file path
    #[arg(long, default_value = "deployment-proxy.log")]
    log_file: PathBuf,

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
                .unwrap_or_else(|_| "deployment_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in deployment_proxy::config::config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        println!("  (built-in defaults when none exist)");
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    // Validate config eagerly; a missing credential stops the process here.
    let base_url = config.effective_base_url()?;
    let credential_env = config.credential_env()?;
    let credential = config.resolve_credential()?;
    let dispatcher = UpstreamDispatcher::from_config(&config, credential)?;

    info!("deployment-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:     {} (preset {})", base_url, config.upstream.preset);
    info!("  API version:  {}", config.effective_api_version()?);
    info!("  Credential:   ${}", credential_env);
    info!("  Deployments:  {} mapped", config.deployments.len());
    info!("  Timeout:      {}s", config.upstream.timeout_secs);
    info!("  Log file:     {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting deployment-proxy upstream={} host={} port={}",
            base_url, config.host, config.port
        ),
    );

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config,
        dispatcher,
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://{}/v1", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
