use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about = "Snow depth field station")]
pub struct Args {
    #[arg(long, env = "SNOW_STATION_CONFIG")]
    pub config: PathBuf,

    /// Take a single reading, print its row and exit.
    #[arg(long)]
    pub once: bool,

    /// Replace all hardware with simulated devices.
    #[arg(long)]
    pub simulate: bool,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}
