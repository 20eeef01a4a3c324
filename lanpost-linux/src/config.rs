//! Load config from file and environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanpost_core::wire::MAX_FRAME_LEN;
use lanpost_core::{Framing, DEFAULT_PORT};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 50 * 1000 * 1000;

/// Daemon configuration. File: `<config dir>/lanpost/config.toml` or /etc/lanpost/config.toml.
/// Env overrides: LANPOST_PORT, LANPOST_BIND_ADDR, LANPOST_DATA_DIR,
/// LANPOST_CONNECT_TIMEOUT_SECS, LANPOST_FRAMING.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP port peers listen and send on (default 8888).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listener bind address (default 0.0.0.0).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Root for `lanpost.db` and `media/`. Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Connect timeout for outgoing messages; at least one second.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// `sentinel` (what deployed peers speak) or `length-prefixed`.
    #[serde(default)]
    pub framing: Framing,
    /// Media content longer than this many characters is written to disk.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
    /// Program run as `<cmd> -- <title> <body>` for notifications. Empty disables it.
    #[serde(default = "default_notify_command")]
    pub notify_command: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_inline_threshold() -> usize {
    lanpost_core::protocol::DEFAULT_INLINE_THRESHOLD
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_LEN
}
fn default_max_attachment_bytes() -> u64 {
    DEFAULT_MAX_ATTACHMENT_BYTES
}
fn default_notify_command() -> String {
    "notify-send".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            data_dir: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            framing: Framing::default(),
            inline_threshold: default_inline_threshold(),
            max_frame_bytes: default_max_frame_bytes(),
            max_attachment_bytes: default_max_attachment_bytes(),
            notify_command: default_notify_command(),
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Configured data dir, else the platform data dir, else `./lanpost-data`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("lanpost-data"))
    }

    /// SQLite file shared by the daemon and every CLI invocation.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("lanpost.db")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir().join("media")
    }

    /// Apply LANPOST_* overrides. Unparseable values are ignored with a warning.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("LANPOST_PORT") {
            match s.parse() {
                Ok(p) => self.port = p,
                Err(_) => warn!(value = %s, "ignoring invalid LANPOST_PORT"),
            }
        }
        if let Some(s) = var("LANPOST_BIND_ADDR") {
            match s.parse() {
                Ok(a) => self.bind_addr = a,
                Err(_) => warn!(value = %s, "ignoring invalid LANPOST_BIND_ADDR"),
            }
        }
        if let Some(s) = var("LANPOST_DATA_DIR") {
            if !s.is_empty() {
                self.data_dir = Some(PathBuf::from(s));
            }
        }
        if let Some(s) = var("LANPOST_CONNECT_TIMEOUT_SECS") {
            match s.parse::<u64>() {
                Ok(t) if t > 0 => self.connect_timeout_secs = t,
                _ => warn!(value = %s, "ignoring invalid LANPOST_CONNECT_TIMEOUT_SECS"),
            }
        }
        if let Some(s) = var("LANPOST_FRAMING") {
            match s.parse() {
                Ok(f) => self.framing = f,
                Err(e) => warn!(value = %s, error = %e, "ignoring invalid LANPOST_FRAMING"),
            }
        }
    }

    /// Replace values that would make the daemon unusable with their defaults.
    fn sanitize(mut self) -> Self {
        if self.connect_timeout_secs == 0 {
            warn!("connect_timeout_secs must be at least 1, using the default");
            self.connect_timeout_secs = default_connect_timeout_secs();
        }
        self
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    load_from(&config_paths())
}

/// Like [`load`], but from an explicit file (`--config`). A missing file is an error.
pub fn load_path(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)?;
    let mut c = toml::from_str::<Config>(&text)?.sanitize();
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn load_from(paths: &[PathBuf]) -> Config {
    let mut c = load_file(paths).unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "lanpost")
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(dirs) = project_dirs() {
        out.push(dirs.config_dir().join("config.toml"));
    }
    out.push(PathBuf::from("/etc/lanpost/config.toml"));
    out
}

/// First existing file wins; a broken one falls back to defaults rather than trying the next.
fn load_file(paths: &[PathBuf]) -> Option<Config> {
    let p = paths.iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(p) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %p.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c.sanitize()),
        Err(e) => {
            warn!(path = %p.display(), error = %e, "invalid config file, using defaults");
            None
        }
    }
}
