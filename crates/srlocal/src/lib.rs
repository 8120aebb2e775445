//! # srlocal - Local Session Server Entry Point
//!
//! Locally-hosted stand-in for the game's retired network backend. This
//! entry point handles CLI parsing, configuration loading, and application
//! lifecycle management; the protocol itself lives in the `aplay_server`
//! crate.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (creates srlocal.toml if missing)
//! srlocal
//!
//! # Specify custom configuration
//! srlocal --config production.toml
//!
//! # Override specific settings
//! srlocal --bind 0.0.0.0:5055 --static-dir /opt/srlocal/static --log-level debug
//!
//! # JSON logging for production
//! srlocal --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default:
//! `srlocal.toml`). If the file doesn't exist, a default configuration will
//! be created. Session tokens the server accepts at login are listed in the
//! `[[sessions]]` section.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the srlocal session server.
///
/// Handles the complete application lifecycle including:
/// 1. Command-line argument parsing
/// 2. Configuration loading and validation
/// 3. Logging system initialization
/// 4. Application creation and execution
/// 5. Error handling and cleanup
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
///
/// Note: This function is called from an async context (main with
/// #[tokio::main]), so it should NOT have #[tokio::main] itself.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments first
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    // Create and run application
    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{AppConfig as Config, LoggingSettings, PathSettings, ServerSettings, SessionEntry};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server_config = config
            .to_server_config()
            .expect("Default config should convert to ServerConfig");
        assert_eq!(server_config.server_id, 1);
        assert_eq!(server_config.receive_timeout_secs, 60);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();

        // Test invalid bind address
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        // Test empty static-data directory
        config.server.bind_address = "127.0.0.1:5055".to_string();
        config.paths.static_dir = String::new();
        assert!(config.validate().is_err());

        // Test invalid log level
        config.paths.static_dir = "static_data".to_string();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_parsing() {
        // Test CLI argument structure
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            data_dir: Some(PathBuf::from("test_data")),
            static_dir: Some(PathBuf::from("test_static")),
            bind_address: Some("127.0.0.1:9000".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: true,
            no_ai: false,
        };

        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.data_dir, Some(PathBuf::from("test_data")));
        assert_eq!(args.bind_address, Some("127.0.0.1:9000".to_string()));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
    }

    #[tokio::test]
    async fn test_application_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = CliArgs {
            config_path: dir.path().join("srlocal.toml"),
            data_dir: Some(dir.path().join("data")),
            static_dir: Some(dir.path().join("static")),
            bind_address: Some("127.0.0.1:0".to_string()),
            log_level: None,
            json_logs: false,
            no_ai: true,
        };

        let app = Application::new(args).await.expect("application");
        // The no-ai flag must land in the engine configuration.
        assert!(!app.engine().config.ai_enabled);
    }
}
