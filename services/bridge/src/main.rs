// bridge: Bidirectional protocol bridge between a WebPA-style uplink bus
// and a hierarchical downlink parameter bus.

use bridge::config::{self, CliOverrides};
use bridge::engine::Engine;
use bridge::uplink::{self, UplinkConfig};
use clap::Parser;
use tracing::{error, info};

/// rdkb-bridge: WebPA uplink <-> downlink parameter bus bridge.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Downlink component name this bridge registers as.
    #[arg(long)]
    component: Option<String>,

    /// Uplink service name (WebPA identity). Overrides `uplink.service_name`.
    #[arg(long)]
    service_name: Option<String>,

    /// Uplink transport: `mock` (stdin/stdout line-JSON) or `parodus` (raw TCP).
    #[arg(long, value_parser = ["mock", "parodus"])]
    mode: Option<String>,

    /// Path to the bridge TOML config file.
    #[arg(long, default_value = "/etc/rdkb-bridge/bridge.toml")]
    config: String,

    /// Log verbosity: 0=error, 1=warn, 2=info, 3=debug. Overrides `RUST_LOG`.
    #[arg(long)]
    log: Option<u8>,
}

fn init_tracing(log_level: Option<u8>) {
    let filter = match log_level {
        Some(0) => tracing_subscriber::EnvFilter::new("error"),
        Some(1) => tracing_subscriber::EnvFilter::new("warn"),
        Some(2) => tracing_subscriber::EnvFilter::new("info"),
        Some(_) => tracing_subscriber::EnvFilter::new("debug"),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log);

    info!(version = env!("CARGO_PKG_VERSION"), "bridge starting");

    let overrides = CliOverrides {
        component: cli.component.clone(),
        service_name: cli.service_name.clone(),
        mode: cli.mode.clone(),
    };

    let cfg = match config::load_config_from_path(std::path::Path::new(&cli.config), &overrides) {
        Ok(cfg) => {
            info!(
                mode = %cfg.uplink.mode,
                service_name = %cfg.uplink.service_name,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let engine = Engine::new(&cfg);

    let uplink_cfg = UplinkConfig {
        service_name: cfg.uplink.service_name.clone(),
        mode: cfg.uplink.mode.clone(),
        parodus_url: cfg.uplink.parodus_url.clone(),
        parodus_client_url: cfg.uplink.parodus_client_url.clone(),
    };

    match uplink::run(uplink_cfg, engine).await {
        Ok(()) => {
            info!("bridge shut down cleanly");
            std::process::exit(0);
        }
        Err(e) => {
            error!(error = %e, "failed to open downlink/uplink connection");
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    }
}
