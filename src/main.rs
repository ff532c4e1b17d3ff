use std::path::PathBuf;

use clap::Parser;
use swerve_runtime::config::RuntimeConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Swerve platform runtime")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Line sensor serial device (skips discovery)
    #[arg(long)]
    line_sensor: Option<PathBuf>,

    /// Disable the line sensor service
    #[arg(long)]
    no_line_sensor: bool,

    /// Home positions file
    #[arg(long)]
    homes_file: Option<PathBuf>,

    /// Run against simulated hardware
    #[arg(long)]
    simulate: bool,
}

impl Args {
    fn runtime_config(&self) -> Result<RuntimeConfig, Box<dyn std::error::Error + Send + Sync>> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                RuntimeConfig::from_file(path)?
            }
            None => RuntimeConfig::default(),
        };

        if let Some(device) = &self.line_sensor {
            config.line_sensor.device = Some(device.clone());
        }
        if self.no_line_sensor {
            config.line_sensor.enabled = false;
        }
        if let Some(path) = &self.homes_file {
            config.runtime.homes_file = Some(path.clone());
        }
        if self.simulate {
            config.runtime.simulate = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let config = match args.runtime_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = swerve_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
