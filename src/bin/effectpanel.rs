use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, LevelFilter};
use simplelog::{Config as LogConfig, SimpleLogger};

use effectpanel_rs::catalog::Catalog;
use effectpanel_rs::{config, host, listener, router};

/// Serve the effect control panel.
#[derive(Parser, Debug)]
struct Args {
    /// Config file (YAML, or JSON by extension).
    #[arg(default_value = "./config.yaml")]
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config_root = config::read_config(&args.config)?;

    let log_level = if config_root.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::init(log_level, LogConfig::default())?;

    // The catalog path is relative to the config file.
    let catalog_path = match args.config.parent() {
        Some(dir) => dir.join(&config_root.catalog),
        None => config_root.catalog.clone(),
    };
    let catalog = Catalog::load(&catalog_path)?;
    info!("Loaded {} devices from {}", catalog.devices().len(), catalog_path.display());

    let hosts = host::from_config(&config_root.hosts)?;
    let cmd_router = router::Router::from_config(catalog.clone(), &config_root.devices, &hosts)?;
    let registry = router::handlers(Arc::new(cmd_router));

    listener::serve(&config_root.server, &catalog, registry)?;

    Ok(())
}
