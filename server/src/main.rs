//! Fleet Forge - Entry Point
//!
//! Firmware build orchestration and OTA rollout service: compiles
//! user-submitted firmware through an isolated toolchain, publishes
//! signed release artifacts and rolls them out to a polling device fleet.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use fleetforge::app::options::AppOptions;
use fleetforge::app::run::run;
use fleetforge::logs::{init_logging, LogOptions};
use fleetforge::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: setting(&cli_args, "log-level", "FLEETFORGE_LOG_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        json_format: setting(&cli_args, "log-json", "FLEETFORGE_LOG_JSON")
            .map(|s| s == "true")
            .unwrap_or(false),
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    // Assemble options from CLI args and environment
    let mut options = AppOptions::default();
    if let Some(host) = setting(&cli_args, "host", "FLEETFORGE_HOST") {
        options.server.host = host;
    }
    if let Some(port) = setting(&cli_args, "port", "FLEETFORGE_PORT") {
        match port.parse() {
            Ok(port) => options.server.port = port,
            Err(_) => {
                error!("Invalid port: {}", port);
                return;
            }
        }
    }
    if let Some(dir) = setting(&cli_args, "artifacts-dir", "FLEETFORGE_ARTIFACTS_DIR") {
        options.storage.artifacts_dir = PathBuf::from(dir);
    }
    if let Some(key) = setting(&cli_args, "signing-key", "FLEETFORGE_SIGNING_KEY") {
        options.storage.signing_key = Some(PathBuf::from(key));
    }
    if let Some(toolchain) = setting(&cli_args, "toolchain", "FLEETFORGE_TOOLCHAIN") {
        options.build.toolchain = PathBuf::from(toolchain);
    }
    if let Some(secs) = setting(&cli_args, "build-timeout", "FLEETFORGE_BUILD_TIMEOUT_SECS") {
        match secs.parse() {
            Ok(secs) => options.build.build_timeout = Duration::from_secs(secs),
            Err(_) => {
                error!("Invalid build timeout: {}", secs);
                return;
            }
        }
    }

    info!("Running Fleet Forge with options: {:?}", options);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the service: {e}");
    }
}

/// CLI argument, falling back to the environment.
fn setting(cli_args: &HashMap<String, String>, key: &str, env_key: &str) -> Option<String> {
    cli_args
        .get(key)
        .cloned()
        .or_else(|| env::var(env_key).ok())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
