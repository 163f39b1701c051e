//! `camrover` – Rover Relay entry point
//!
//! 1. Initialises structured logging (and OTLP export when configured).
//! 2. Loads `~/.camrover/config.toml` plus environment overrides.
//! 3. Binds the relay; a bind failure is the only fatal error.
//! 4. Serves until **Ctrl-C**, then stops accepting and exits.

mod config;
mod telemetry;

use camrover_server::RelayServer;
use colored::Colorize;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _guard = telemetry::init_tracing("camrover");

    print_banner();

    let loaded = config::load();
    match &loaded.file_error {
        None => info!(path = %config::config_path().display(), "configuration loaded"),
        Some(e) => warn!(error = %e, "config error, using defaults plus environment overrides"),
    }
    let cfg = loaded.config;

    let server_config = match cfg.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let bound = match RelayServer::new(server_config).bind().await {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "relay failed to start");
            std::process::exit(1);
        }
    };

    let addr = bound.local_addr();
    println!("  {} http://{}", "Relay:".bold(), addr);
    println!("  {} ws://{}", "Peers:".bold(), addr);
    println!("  {} http://{}/video/", "Video:".bold(), addr);
    println!("  {} {}\n", "Camera:".bold(), cfg.camera_url.dimmed());

    bound
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    println!("{}", "  ✓ Relay stopped.".green());
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "camrover".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Rover control & telemetry relay");
    println!();
}
