//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that orchestrates
//! server startup, session registration, and graceful shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent},
};
use aplay_server::{AplayServer, Services};
use tracing::{error, info, warn};

/// Main application struct.
///
/// The `Application` struct manages the complete lifecycle of the srlocal
/// server: configuration loading and validation, collaborator wiring,
/// session-token registration, listener startup, and graceful shutdown.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Protocol server instance
    server: AplayServer,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings, and
    /// initializes the protocol server with proper error handling.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` instance ready to run, or an error if
    /// initialization failed.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Wire the collaborators and register accepted session tokens
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        info!("✅ Configuration loaded successfully from {}", args.config_path.display());

        // Apply CLI overrides
        if let Some(data_dir) = args.data_dir {
            config.paths.data_dir = data_dir.to_string_lossy().to_string();
        }

        if let Some(static_dir) = args.static_dir {
            config.paths.static_dir = static_dir.to_string_lossy().to_string();
        }

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if args.no_ai {
            config.server.ai_enabled = false;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        let services = Services::new(&config.paths.data_dir, &config.paths.static_dir);
        for entry in &config.sessions {
            services
                .identity
                .set_identity_for_session(&entry.token, &entry.identity);
        }
        info!("🔑 Registered {} session token(s)", config.sessions.len());

        let server_config = config.to_server_config()?;
        let server = AplayServer::new(server_config, services);

        info!(
            "📂 Config: {} | Careers: {} | Static data: {}",
            args.config_path.display(),
            config.paths.data_dir,
            config.paths.static_dir
        );

        Ok(Self { config, server })
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// Starts the listener in a background task, waits for SIGINT/SIGTERM,
    /// then requests a global engine stop and waits for the accept loop to
    /// drain.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the application ran and shut down successfully, or an
    /// error if there was a critical failure during execution.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting srlocal session server");
        self.log_configuration_summary();

        let engine = self.server.engine();

        // Start server in background
        let server_handle = {
            let server = self.server;
            tokio::spawn(async move {
                match server.start().await {
                    Ok(()) => {
                        info!("✅ Server completed successfully");
                    }
                    Err(e) => {
                        error!("❌ Server error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        info!("✅ srlocal is now running!");
        info!("🎮 Ready to accept connections on {}", self.config.server.bind_address);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        wait_for_shutdown_signal().await?;

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        engine.request_shutdown();

        info!("⏳ Waiting for server task to complete gracefully...");
        if let Err(e) = tokio::time::timeout(
            tokio::time::Duration::from_secs(8),
            server_handle,
        )
        .await
        {
            warn!("⏰ Server task did not complete within timeout, proceeding with cleanup: {:?}", e);
        } else {
            info!("✅ Server task completed gracefully");
        }

        info!("✅ srlocal shutdown complete");
        info!("👋 Thank you for using srlocal!");

        Ok(())
    }

    /// The shared engine context of the wired server.
    pub fn engine(&self) -> std::sync::Arc<aplay_server::Engine> {
        self.server.engine()
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  📖 Storyline: {}", self.config.server.storyline);
        info!("  💾 Career data: {}", self.config.paths.data_dir);
        info!("  📦 Static data: {}", self.config.paths.static_dir);
        info!("  🤖 AI turns: {}", if self.config.server.ai_enabled { "enabled" } else { "disabled" });
        info!("  ⏱️ Receive timeout: {}s", self.config.server.receive_timeout_secs);
    }
}
