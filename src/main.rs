//! http-wasm CLI entry point.
//!
//! Serves a WebAssembly guest as HTTP middleware in front of an upstream
//! server: requests the guest passes on are proxied to the upstream.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use http_wasm_common::ConfigFile;
use http_wasm_host::Runtime;
use http_wasm_server::{AxumHost, ErrorPolicy, HttpWasmServer, ServerConfig, UpstreamProxy};

/// Run an http-wasm guest in front of an upstream server.
#[derive(Debug, Parser)]
#[command(name = "http-wasm", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "HTTP_WASM_CONFIG")]
    config: Option<PathBuf>,

    /// Guest module, binary or text format. Overrides `[guest].path`.
    #[arg(short, long, env = "HTTP_WASM_GUEST")]
    guest: Option<String>,

    /// Configuration passed to the guest. Overrides `[guest].config`.
    #[arg(long, env = "HTTP_WASM_GUEST_CONFIG")]
    guest_config: Option<String>,

    /// Upstream base URL. Overrides `[upstream].url`.
    #[arg(short, long, env = "HTTP_WASM_UPSTREAM")]
    upstream: Option<String>,

    /// Bind address, e.g. `0.0.0.0:8080`. Overrides `[server].bind_addr`.
    #[arg(short, long, env = "BIND_ADDR")]
    bind: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "HTTP_WASM_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn load(self) -> anyhow::Result<ConfigFile> {
        let mut file = match &self.config {
            Some(path) => ConfigFile::from_file(path)?,
            None => ConfigFile::default(),
        };

        if let Some(guest) = self.guest {
            file.guest.path = Some(guest);
        }
        if let Some(guest_config) = self.guest_config {
            file.guest.config = Some(guest_config);
            file.guest.config_path = None;
        }
        if let Some(upstream) = self.upstream {
            file.upstream.url = Some(upstream);
        }
        if let Some(bind) = self.bind {
            file.server.bind_addr = bind;
        }
        Ok(file)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let json = args.log_json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,http_wasm=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    let file = args.load()?;

    let guest_path = file
        .guest
        .path
        .as_deref()
        .context("No guest module. Pass --guest or set [guest].path")?;
    let upstream = file
        .upstream
        .url
        .as_deref()
        .context("No upstream. Pass --upstream or set [upstream].url")?;

    let source = std::fs::read(guest_path)
        .with_context(|| format!("Failed to read guest module '{guest_path}'"))?;
    let guest_config = file.guest.load_config()?;

    let server_config = ServerConfig::from_file(&file.server)?;
    let policy = ErrorPolicy::from_config(&file.errors)?;
    let proxy = UpstreamProxy::new(upstream, server_config.max_body_bytes)?;

    info!(guest = %guest_path, upstream = %upstream, "Configuration loaded");

    let runtime = Runtime::builder(AxumHost::new())
        .config(file.runtime)
        .guest_config(guest_config)
        .build(&source)
        .await
        .with_context(|| format!("Failed to load guest '{guest_path}'"))?;

    info!(bind_addr = %server_config.bind_addr, "Guest ready. Endpoints:");
    info!("  GET  /health  - Health check");
    info!("  GET  /ready   - Readiness check with pool occupancy");
    info!("  *    /*       - Through the guest to {upstream}");

    HttpWasmServer::new(runtime, proxy.into_router())
        .with_config(server_config)
        .with_policy(policy)
        .run()
        .await?;

    Ok(())
}
