//! Deploy bot - Entry Point
//!
//! Without `--worker` this runs the master: it connects to chat, forks the
//! worker pool and routes commands. With `--worker --name=<n> --dir=<path>`
//! it runs one worker bound to a working copy.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use deploybot::app::options::{AppOptions, LifecycleOptions, WorkerOptions};
use deploybot::app::run::{run_master, run_worker};
use deploybot::filesys::file::File;
use deploybot::logs::{init_logging, LogOptions};
use deploybot::storage::settings::{Settings, DEFAULT_SETTINGS_FILE};
use deploybot::utils::version_info;
use deploybot::worker::WorkerIdentity;

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
            Err(e) => eprintln!("Unable to print version: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = match Settings::load(&File::new(&settings_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {e}", settings_path.display());
            std::process::exit(1);
        }
    };

    let worker_identity = if cli_args.contains_key("worker") {
        match (cli_args.get("name"), cli_args.get("dir")) {
            (Some(name), Some(dir)) => Some(WorkerIdentity::new(name, dir)),
            _ => {
                eprintln!("Usage: deploybot --worker --name=<name> --dir=<working copy>");
                std::process::exit(2);
            }
        }
    } else {
        None
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        file_prefix: worker_identity
            .as_ref()
            .map(|identity| identity.name.clone())
            .unwrap_or_else(|| "master".to_string()),
        ..Default::default()
    };
    // Flushes the log file on exit
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let lifecycle = LifecycleOptions::default();
    let result = match worker_identity {
        Some(identity) => {
            info!(
                "Running worker {} on {} (version {})",
                identity.name,
                identity.directory.display(),
                version.version
            );
            let options = WorkerOptions {
                lifecycle,
                identity,
                settings,
            };
            run_worker(options, await_shutdown_signal()).await
        }
        None => {
            info!("Running deploy bot master (version {})", version.version);
            let options = AppOptions {
                lifecycle,
                settings_path,
                settings,
            };
            run_master(options, await_shutdown_signal()).await
        }
    };

    if let Err(e) = result {
        error!("Deploy bot stopped with an error: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
