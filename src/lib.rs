pub mod aoi;
pub mod db;
pub mod models;
pub mod recorder;
pub mod replay;
pub mod sampler;
pub mod settings;
pub mod utils;

use anyhow::Context;
use clap::Parser;

pub use aoi::{AoiManager, FixedRegionSource, RegionSource};
pub use recorder::{RecordStore, RecorderController};
pub use sampler::PositionSampler;
pub use settings::TrackerSettings;

pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = replay::Cli::parse();
    log::info!("aoitrack v{} starting up...", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(replay::run(cli))
}
