use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_SERVER_HOST: &str = "87.98.220.215";
pub const DEFAULT_LOGIN_PORT: u16 = 7171;
pub const DEFAULT_GAME_PORT: u16 = 7172;

/// Runtime configuration for the proxy and its data directory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream game server (IPv4: the login interceptor needs the
    /// packed form for the character-list rewrite).
    pub server_host: String,
    pub login_port: u16,
    pub game_port: u16,
    /// Recordings, tasks, settings, and control socket live here.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn new(server_host: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_host: server_host.into(),
            login_port: DEFAULT_LOGIN_PORT,
            game_port: DEFAULT_GAME_PORT,
            data_dir: data_dir.into(),
        }
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".otbot")
    }

    pub fn server_ip(&self) -> Result<Ipv4Addr> {
        self.server_host
            .parse()
            .map_err(|_| Error::Setup(format!("server host must be an IPv4 address: {}", self.server_host)))
    }

    /// Local listener the client connects to for login.
    pub fn login_listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.login_port))
    }

    /// Local listener the rewritten character list points the client at.
    pub fn game_listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.game_port))
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("bot_settings.json")
    }

    pub fn control_socket_path(&self) -> PathBuf {
        self.data_dir.join("otbot.sock")
    }

    pub fn bridge_socket_path(&self) -> PathBuf {
        self.data_dir.join("bridge.sock")
    }
}
