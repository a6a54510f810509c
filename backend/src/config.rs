//! Configuration management.

use crate::discovery::{DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_QUERY_INTERVAL};
use crate::playback::{default_player, PlaybackSettings, YtDlpVlcStages, DEFAULT_FORMAT};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    cast: CastConfig,
    #[serde(default)]
    tools: ToolsConfig,
    #[serde(default)]
    discovery: DiscoveryConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct CastConfig {
    /// Fixed receiver address; discovered at startup when unset
    receiver_ip: Option<IpAddr>,
    vlc_password: String,
    cache_dir: PathBuf,
    max_cached_files: usize,
    cookies_file: Option<PathBuf>,
    marker_path: PathBuf,
    verbose: bool,
    stop_grace_ms: u64,
}

impl Default for CastConfig {
    fn default() -> Self {
        let playback = PlaybackSettings::default();
        Self {
            receiver_ip: None,
            vlc_password: "rpitube".to_string(),
            cache_dir: playback.cache_dir,
            max_cached_files: 5,
            cookies_file: None,
            marker_path: playback.marker_path,
            verbose: playback.verbose,
            stop_grace_ms: playback.stop_grace.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ToolsConfig {
    fetcher: String,
    player: String,
    format: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetcher: "yt-dlp".to_string(),
            player: default_player(),
            format: DEFAULT_FORMAT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DiscoveryConfig {
    timeout_ms: u64,
    query_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_DISCOVERY_TIMEOUT.as_millis() as u64,
            query_interval_ms: DEFAULT_QUERY_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_port() -> u16 {
    rpitube_types::DEFAULT_PORT
}

/// Values given on the command line. `None` leaves lower layers untouched.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub vlc_password: Option<String>,
    pub cache_dir: Option<PathBuf>,
    /// Only `true` overrides; absence of the flag is not "false"
    pub verbose: bool,
    pub cookies_file: Option<PathBuf>,
    pub receiver_ip: Option<IpAddr>,
    pub log_file: Option<PathBuf>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Receiver to cast to; `None` means discover one at startup
    pub receiver_ip: Option<IpAddr>,
    /// Password of the VLC HTTP interface
    pub vlc_password: String,
    /// Directory downloads are written to
    pub cache_dir: PathBuf,
    /// Number of downloads kept in `cache_dir`
    pub max_cached_files: usize,
    /// Cookies file handed to yt-dlp
    pub cookies_file: Option<PathBuf>,
    pub marker_path: PathBuf,
    /// Log spawned commands and dump discovered devices
    pub verbose: bool,
    pub stop_grace: Duration,
    pub fetcher: String,
    pub player: String,
    pub format: String,
    pub discovery_timeout: Duration,
    pub query_interval: Duration,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.rpitube.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/rpitube/ on Linux)
    ///
    /// Environment variables use the `RPITUBE_` prefix and `__` between
    /// section and key, e.g. `RPITUBE_CAST__VLC_PASSWORD`.
    pub fn from_figment(cli: CliOverrides) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".rpitube.toml"));
        let user_config = directories::ProjectDirs::from("", "", "rpitube")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // 1. Start with defaults
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        // 2. Merge user config file if it exists
        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 3. Merge local config file if it exists
        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 4. Merge environment variables (RPITUBE_* prefix)
        figment = figment.merge(Env::prefixed("RPITUBE_").split("__"));

        // 5. Merge CLI arguments (highest priority)
        if let Some(port) = cli.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        if let Some(ref password) = cli.vlc_password {
            figment = figment.merge(Serialized::default("cast.vlc_password", password));
        }
        if let Some(ref dir) = cli.cache_dir {
            figment = figment.merge(Serialized::default("cast.cache_dir", dir));
        }
        if cli.verbose {
            figment = figment.merge(Serialized::default("cast.verbose", true));
        }
        if let Some(ref cookies) = cli.cookies_file {
            figment = figment.merge(Serialized::default("cast.cookies_file", cookies));
        }
        if let Some(ip) = cli.receiver_ip {
            figment = figment.merge(Serialized::default("cast.receiver_ip", ip));
        }
        if let Some(ref log_file) = cli.log_file {
            figment = figment.merge(Serialized::default("logging.log_file", log_file));
        }

        let config_file: ConfigFile = figment.extract()?;
        Ok(Self::from(config_file))
    }

    /// Settings for the playback orchestrator.
    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            cache_dir: self.cache_dir.clone(),
            marker_path: self.marker_path.clone(),
            verbose: self.verbose,
            stop_grace: self.stop_grace,
        }
    }

    /// Stage command builder for yt-dlp and VLC.
    pub fn stage_commands(&self) -> YtDlpVlcStages {
        YtDlpVlcStages {
            fetcher: self.fetcher.clone(),
            player: self.player.clone(),
            format: self.format.clone(),
            cookies_file: self.cookies_file.clone(),
            vlc_password: self.vlc_password.clone(),
        }
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Self {
            port: file.server.port,
            receiver_ip: file.cast.receiver_ip,
            vlc_password: file.cast.vlc_password,
            cache_dir: file.cast.cache_dir,
            max_cached_files: file.cast.max_cached_files,
            cookies_file: file.cast.cookies_file,
            marker_path: file.cast.marker_path,
            verbose: file.cast.verbose,
            stop_grace: Duration::from_millis(file.cast.stop_grace_ms),
            fetcher: file.tools.fetcher,
            player: file.tools.player,
            format: file.tools.format,
            discovery_timeout: Duration::from_millis(file.discovery.timeout_ms),
            query_interval: Duration::from_millis(file.discovery.query_interval_ms),
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from(ConfigFile::default())
    }
}
