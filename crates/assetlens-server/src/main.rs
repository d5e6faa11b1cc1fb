//! assetlens: design asset extraction server and CLI.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use futures::StreamExt;

use assetlens::{AssetExtractor, ChromiumRenderer, ExtractorConfig, NoopRenderer, Renderer};

#[derive(Parser)]
#[command(
    name = "assetlens",
    about = "Extract colors, fonts, images and SVG icons from web pages",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default).
    Serve {
        /// Listen address (host:port).
        #[arg(long, env = "ASSETLENS_ADDR", default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },

    /// Extract one URL and print the result as JSON.
    Extract {
        url: String,

        /// Ignore any cached result.
        #[arg(long)]
        force: bool,

        /// Print every stream event as a JSON line instead of the final result.
        #[arg(long)]
        stream: bool,
    },

    /// Serve the `extract_assets` MCP tool over stdin/stdout.
    Mcp,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   assetlens completions bash > ~/.local/share/bash-completion/completions/assetlens
    ///   assetlens completions zsh > ~/.zfunc/_assetlens
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// `ASSETLENS_ADDR` when set and valid, else the loopback default.
fn default_addr() -> SocketAddr {
    std::env::var("ASSETLENS_ADDR")
        .ok()
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8000)))
}

/// Chromium when it launches, otherwise HTTP-only extraction.
async fn launch_renderer() -> Arc<dyn Renderer> {
    match ChromiumRenderer::new().await {
        Ok(renderer) => {
            tracing::info!("Chromium renderer ready");
            Arc::new(renderer)
        }
        Err(e) => {
            tracing::warn!("{e:#}; running in HTTP-only mode");
            Arc::new(NoopRenderer)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match cli.command.unwrap_or_else(|| Commands::Serve {
        addr: default_addr(),
    }) {
        Commands::Serve { addr } => {
            let renderer = launch_renderer().await;
            let extractor =
                AssetExtractor::in_memory(Arc::clone(&renderer), ExtractorConfig::from_env());
            let served = assetlens_server::serve(addr, extractor).await;
            renderer.shutdown().await.ok();
            served?;
        }

        Commands::Extract { url, force, stream } => {
            let renderer = launch_renderer().await;
            let extractor =
                AssetExtractor::in_memory(Arc::clone(&renderer), ExtractorConfig::from_env());
            let outcome = if stream {
                print_stream(&extractor, &url, force).await
            } else {
                print_result(&extractor, &url, force).await
            };
            renderer.shutdown().await.ok();
            outcome?;
        }

        Commands::Mcp => {
            let renderer = launch_renderer().await;
            let extractor =
                AssetExtractor::in_memory(Arc::clone(&renderer), ExtractorConfig::from_env());
            let handler = assetlens_server::mcp::ProtocolHandler::new(extractor);
            let served = assetlens_server::mcp::stdio::run(&handler).await;
            renderer.shutdown().await.ok();
            served?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "assetlens", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn print_result(extractor: &AssetExtractor, url: &str, force: bool) -> anyhow::Result<()> {
    let result = extractor
        .extract(url, force)
        .await
        .with_context(|| format!("extraction of {url} failed"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn print_stream(extractor: &AssetExtractor, url: &str, force: bool) -> anyhow::Result<()> {
    let (mut frames, _cancel) = extractor.stream(url, force).await;
    while let Some(frame) = frames.next().await {
        if let Some(event) = frame.event() {
            println!("{}", serde_json::to_string(event)?);
        }
    }
    Ok(())
}
