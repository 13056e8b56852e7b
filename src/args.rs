use std::path::PathBuf;

use clap::Parser;

/// Returns the parsed command line options.
pub fn parse_args() -> Args {
    Args::parse()
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(
        short = 'k',
        long,
        env = "GOOGLE_MAPS_API_KEY",
        hide_env_values = true,
        help = "Google Maps Time Zone API key used to resolve the local time zone of each track"
    )]
    pub api_key: String,

    #[arg(
        required = true,
        help = "GPX files, or folders of GPX files, to rename after their recording name and \
                local start date"
    )]
    pub targets: Vec<PathBuf>,
}
