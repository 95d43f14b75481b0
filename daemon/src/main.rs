//! Entry point: parse CLI/TOML configuration, initialize logging, run.

use std::process::ExitCode;

use watchdog::config::{parse_cli, Config};

fn main() -> ExitCode {
    let args = parse_cli();
    let config = match Config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("watchdog: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    match watchdog::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("watchdog: fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
