extern crate serde;
extern crate serde_json;

mod config;
mod db;
mod errors;
mod image_converter;
mod importer;
mod processor;
mod record;
mod scanner;
mod server;
mod settings;
mod steps;
mod time;

use env_logger::Env;

#[macro_use]
extern crate log;

use crate::config::Cli;
use crate::db::Store;
use crate::settings::{Config, Settings};
use crate::steps::FlagFileLedger;
use anyhow::Context;
use clap::Parser;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct AppContext {
    config: Arc<Config>,
    store: Arc<Mutex<Store>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let default_filter = if settings::debug_enabled(&cli.settings) {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let settings = Settings::load(&cli.settings)
        .with_context(|| format!("could not load settings from {}", cli.settings.display()))?;
    info!("Loaded settings from {}", settings.path().display());
    let mut config = settings.config().context("invalid settings")?;
    if let Some(database) = cli.database_url {
        config.paths.database = database;
    }

    let mut store = Store::open(&config.paths.database).with_context(|| {
        format!(
            "could not open database {}",
            config.paths.database.display()
        )
    })?;
    let ledger = FlagFileLedger::new(config.paths.images_dir(), config.paths.thumbnails_dir());
    let config = Arc::new(config);
    let (config, store) = tokio::task::spawn_blocking(move || {
        processor::run(&config, &mut store, &ledger).map(|_| (config, store))
    })
    .await
    .context("startup steps panicked")??;

    if cli.pipeline_only {
        info!("Startup steps finished, not serving");
        return Ok(());
    }
    let ctx = AppContext {
        config,
        store: Arc::new(Mutex::new(store)),
    };
    server::serve(ctx).await
}
