//! hearth: a plugin host.
//!
//! Loads the plugins listed in the configuration, starts the host and fires
//! `host.tick` until a shutdown signal arrives or a plugin calls the
//! `host.exit` service.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::anyhow;
use cli::CliArgs;
use config::AppConfig;
use hearth_core::{Host, HostState};
use plugin_system::PluginManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the host state is polled when ticking is disabled.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// The running host process: configuration, host and plugin manager.
///
/// # Example
///
/// ```rust
/// let args = CliArgs::parse();
/// let app = Application::new(args).await?;
/// app.run().await?;
/// ```
pub struct Application {
    config: AppConfig,
    host: Arc<Host>,
    manager: PluginManager,
    list_only: bool,
}

impl Application {
    /// Builds the application from command line arguments.
    ///
    /// Loads the configuration file, applies the command line overrides,
    /// validates the result and installs the tracing subscriber.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command line arguments
    ///
    /// # Returns
    ///
    /// The application ready to run, or an error if the configuration cannot
    /// be loaded or is invalid, or logging cannot be set up.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(plugin_dir) = args.plugin_dir {
            config.plugins.search_paths.insert(0, plugin_dir);
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;

        let host = Host::new(config.host.name.clone());
        let manager = PluginManager::with_dylib_loader(host.clone(), config.plugins.search_paths.clone());

        info!(
            "Hearth v{} | Config: {} | Host: {} ({})",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display(),
            host.name(),
            host.id()
        );

        Ok(Self {
            config,
            host,
            manager,
            list_only: args.list,
        })
    }

    /// Loads and starts the configured plugins and drives the host until
    /// shutdown.
    ///
    /// Plugins that fail to load or start are reported and skipped. The loop
    /// ends on SIGINT/SIGTERM or when the host reaches `Terminated`, after
    /// which every plugin is unloaded in reverse load order.
    ///
    /// # Returns
    ///
    /// An error only if the configured plugin list cannot be turned into load
    /// requests.
    pub async fn run(self) -> anyhow::Result<()> {
        if self.list_only {
            self.list_plugins();
            return Ok(());
        }

        info!("Configuration Summary:");
        for path in self.manager.search_paths() {
            info!("  Plugin search path: {}", path.display());
        }
        info!("  Tick interval: {}ms", self.config.host.tick_interval_ms);

        let requests = self.config.to_requests().map_err(|e| anyhow!(e))?;
        let summary = self.manager.load_all(&requests);
        for (name, e) in &summary.failed {
            warn!("Plugin {} not running: {} ({:?})", name, e, e.category());
        }

        self.host.start();
        info!("Host is running with {} plugins. Press Ctrl+C to shut down", self.manager.len());

        self.run_loop().await;

        info!("Shutting down");
        self.host.exit();
        self.manager.unload_all();
        info!("Hearth shutdown complete");
        Ok(())
    }

    async fn run_loop(&self) {
        let ticking = self.config.host.tick_interval_ms > 0;
        let period = if ticking {
            Duration::from_millis(self.config.host.tick_interval_ms)
        } else {
            IDLE_POLL
        };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let shutdown = signals::setup_signal_handlers();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    match result {
                        Ok(()) => info!("Shutdown signal received"),
                        Err(e) => error!("Signal handling failed: {}", e),
                    }
                    break;
                }
                _ = interval.tick() => {
                    if ticking {
                        self.host.tick();
                    }
                    if self.host.state() == HostState::Terminated {
                        info!("Host exit requested");
                        break;
                    }
                }
            }
        }
    }

    fn list_plugins(&self) {
        let candidates = self.manager.discover();
        if candidates.is_empty() {
            println!("No plugin files found");
            return;
        }
        for candidate in candidates {
            println!(
                "{:<24} {:<10} {}",
                candidate.name,
                candidate.version,
                candidate.path.display()
            );
        }
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
