use std::io::Write;

use args::parse_args;
use clap::builder::styling::AnsiColor;
use env_logger::Builder;
use log::{debug, info};
use timezone::GoogleTimeZoneApi;

mod args;
mod gpx_reader;
mod processor;
mod timezone;
mod walker;

pub const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");

fn main() {
    configure_logging();
    info!("Starting {PROGRAM_NAME}");

    let args = parse_args();
    debug!("Targets: {:?}", &args.targets);

    // One resolver for the whole run; it owns the HTTP agent and the API key.
    let resolver = GoogleTimeZoneApi::new(args.api_key.clone());

    // Strictly sequential: each file runs to completion before the next, and
    // a failed file never aborts the batch.
    for target in &args.targets {
        walker::process_target(target, |file| processor::process_file(file, &resolver));
    }
}

fn configure_logging() {
    let mut builder = Builder::from_default_env();

    builder.format(|buf, record| {
        let level_style = buf.default_level_style(record.level());
        let level_style = match record.level() {
            log::Level::Error => level_style.fg_color(Some(AnsiColor::Red.into())),
            log::Level::Warn => level_style.fg_color(Some(AnsiColor::Yellow.into())),
            log::Level::Info => level_style.fg_color(Some(AnsiColor::Green.into())),
            log::Level::Debug => level_style.fg_color(Some(AnsiColor::Blue.into())),
            log::Level::Trace => level_style.fg_color(Some(AnsiColor::Magenta.into())),
        };

        match (record.file(), record.line()) {
            (Some(file), Some(line)) => writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}:{}] {}",
                buf.timestamp(),
                record.level(),
                file,
                line,
                record.args()
            ),
            _ => writeln!(
                buf,
                "[{} {level_style}{}{level_style:#}] {}",
                buf.timestamp(),
                record.level(),
                record.args()
            ),
        }
    });

    builder.init();
}
