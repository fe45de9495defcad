pub mod config;
pub mod entity;
pub mod mqtt;
pub mod platform;
pub mod roomba;

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing::level_filters::LevelFilter;
use tracing::{info, Subscriber};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

use crate::config::{default_config_path, Config};
use crate::platform::{setup_platform, Platform};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let (subscriber, log_level) = logging_subscriber();
    subscriber.init();

    let config = load_config().await?;
    log_level.reload(config.logging.level_filter()?)?;

    let switches =
        setup_platform(&config).map_err(|e| eyre!("Failed to set up devices: {}", e))?;

    let mut platform = Platform::new(switches);
    info!("Set up {} roomba switch(es)", platform.switches().len());
    platform.run(config.platform.scan_interval()).await;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

type LevelHandle = reload::Handle<LevelFilter, Registry>;

/// Logs at INFO until the config file has been read, then at its level.
fn logging_subscriber() -> (impl Subscriber + Send + Sync + 'static, LevelHandle) {
    let (level, handle) = reload::Layer::new(LevelFilter::INFO);
    let subscriber = tracing_subscriber::registry().with(level).with(
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );
    (subscriber, handle)
}

/// Reads the config named on the command line, or the per-user default. A
/// missing default file is replaced by an example that has to be edited first.
async fn load_config() -> Result<Config> {
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => {
            let path = default_config_path();
            if Config::ensure_default_config(&path).await? {
                return Err(eyre!(
                    "No config found. An example was written to {}; edit it and restart",
                    path.display()
                ));
            }
            path
        }
    };

    Config::load(&path)
        .await
        .map_err(|e| eyre!("Failed to load {}: {}", path.display(), e))
}
