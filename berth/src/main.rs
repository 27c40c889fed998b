//! Berth - Entry Point
//!
//! A single-host deployment orchestrator: blue-green releases, webhook-driven
//! pipelines, rollbacks and notifications for containerized apps.

use std::collections::HashMap;
use std::env;

use berth::app::options::{AppOptions, LifecycleOptions, ServerOptions};
use berth::app::run::run;
use berth::logs::{init_logging, LogOptions};
use berth::storage::layout::StorageLayout;
use berth::storage::settings::Settings;
use berth::utils::version_info;

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
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Initialize the storage layout and write default settings
    if cli_args.contains_key("init") {
        return init_storage(&layout).await;
    }

    // Retrieve the settings file
    let settings_file = layout.settings_file();
    let settings = match settings_file.read_json::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            error!("Unable to read settings file: {}", e);
            error!("Run: berth --init");
            return;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: false,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    // Run the daemon
    let layout = match &settings.data_dir {
        Some(dir) => StorageLayout::new(dir),
        None => layout,
    };
    let options = AppOptions {
        lifecycle: LifecycleOptions {
            is_persistent: settings.is_persistent,
            ..Default::default()
        },
        storage: berth::app::options::StorageOptions { layout },
        enable_server: settings.enable_server,
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        ..Default::default()
    };

    info!("Running berth {} on {}:{}", version.version, options.server.host, options.server.port);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run berth: {e}");
    }
}

async fn init_storage(layout: &StorageLayout) {
    if let Err(e) = layout.setup().await {
        error!("Failed to create storage layout: {}", e);
        return;
    }
    let settings_file = layout.settings_file();
    if settings_file.exists().await {
        println!("Settings file already exists at {}", settings_file.path().display());
        return;
    }
    if let Err(e) = settings_file.write_json_atomic(&Settings::default()).await {
        error!("Failed to write default settings: {}", e);
        return;
    }
    println!("Initialized storage at {}", layout.base_dir.display());
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
