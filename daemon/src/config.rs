//! CLI + TOML configuration surface.
//!
//! Grounded on `angkira-rpi-webrtc-streamer/rust/src/config.rs`'s
//! serde-with-default-functions `Config` struct for the TOML layer, and on
//! `camera_hub/src/main.rs`'s `docopt::Docopt` USAGE string for the CLI
//! layer. Precedence: built-in defaults < `-config` TOML file < explicit CLI
//! flags.

use docopt::Docopt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const USAGE: &str = "
watchdog: a single-host video-surveillance daemon.

Usage:
  watchdog [options] <address>
  watchdog (--version | -V)
  watchdog (--help | -h)

Options:
    -port ARG            HTTP listen port [default: 8000]
    -width ARG            Requested capture width [default: 1280]
    -height ARG            Requested capture height [default: 720]
    -active-fps ARG        fps when scene active or viewer watching
    -rest-fps ARG          fps otherwise [default: 1]
    -car-alart-secs ARG    Seconds before a blocking car becomes CAR_NOT_LEAVE [default: 120]
    -cache-path ARG        Recordings directory
    -cache-days ARG        Retention window for recordings, in days [default: 30]
    -config ARG            TOML configuration file
    -log-level ARG          error, warn, info, debug or trace [default: info]
    --version, -V           Show version
    --help, -h              Show help
";

#[derive(Debug, Clone, Deserialize)]
pub struct Args {
    pub arg_address: String,
    pub flag_port: Option<u16>,
    pub flag_width: Option<u32>,
    pub flag_height: Option<u32>,
    pub flag_active_fps: Option<u32>,
    pub flag_rest_fps: Option<u32>,
    pub flag_car_alart_secs: Option<u64>,
    pub flag_cache_path: Option<String>,
    pub flag_cache_days: Option<u64>,
    pub flag_config: Option<String>,
    pub flag_log_level: Option<String>,
}

pub fn parse_cli() -> Args {
    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit())
}

/// The on-disk TOML shape. Every field is optional so a
/// partial file only overrides what it names; unset fields fall through to
/// [`Config::default`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub port: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub active_fps: Option<u32>,
    pub rest_fps: Option<u32>,
    pub car_alart_secs: Option<u64>,
    pub cache_path: Option<String>,
    pub cache_days: Option<u64>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

fn default_active_fps() -> u32 {
    2 * num_cpus()
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

fn default_cache_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".watchdog").join("video_cache")
}

/// The fully-resolved configuration used by every stage.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub width: u32,
    pub height: u32,
    pub active_fps: u32,
    pub rest_fps: u32,
    pub car_alart_secs: u64,
    pub cache_path: PathBuf,
    pub cache_days: u64,
    pub log_level: String,
}

impl Config {
    /// Merges built-in defaults, an optional `-config` TOML file, then
    /// explicit CLI flags, in that precedence order.
    pub fn resolve(args: &Args) -> anyhow::Result<Self> {
        let file = match &args.flag_config {
            Some(path) => FileConfig::from_file(std::path::Path::new(path))?,
            None => FileConfig::default(),
        };

        Ok(Config {
            address: args.arg_address.clone(),
            port: args.flag_port.or(file.port).unwrap_or(8000),
            width: args.flag_width.or(file.width).unwrap_or(1280),
            height: args.flag_height.or(file.height).unwrap_or(720),
            active_fps: args
                .flag_active_fps
                .or(file.active_fps)
                .unwrap_or_else(default_active_fps),
            rest_fps: args.flag_rest_fps.or(file.rest_fps).unwrap_or(1),
            car_alart_secs: args
                .flag_car_alart_secs
                .or(file.car_alart_secs)
                .unwrap_or(120),
            cache_path: args
                .flag_cache_path
                .clone()
                .or(file.cache_path)
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_path),
            cache_days: args.flag_cache_days.or(file.cache_days).unwrap_or(30),
            log_level: args
                .flag_log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args(address: &str) -> Args {
        Args {
            arg_address: address.to_string(),
            flag_port: None,
            flag_width: None,
            flag_height: None,
            flag_active_fps: None,
            flag_rest_fps: None,
            flag_car_alart_secs: None,
            flag_cache_path: None,
            flag_cache_days: None,
            flag_config: None,
            flag_log_level: None,
        }
    }

    #[test]
    fn defaults_apply_without_config_file_or_flags() {
        let config = Config::resolve(&bare_args("/dev/video0")).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.width, 1280);
        assert_eq!(config.rest_fps, 1);
        assert_eq!(config.car_alart_secs, 120);
    }

    #[test]
    fn cli_flag_overrides_file_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.toml");
        std::fs::write(&path, "port = 9000\nrest-fps = 2\n").unwrap();

        let mut args = bare_args("/dev/video0");
        args.flag_config = Some(path.to_str().unwrap().to_string());
        args.flag_port = Some(9090);

        let config = Config::resolve(&args).unwrap();
        assert_eq!(config.port, 9090); // CLI wins over file
        assert_eq!(config.rest_fps, 2); // file wins over default
    }
}
