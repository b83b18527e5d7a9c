use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_PAGE_DIR: &str = "web";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Directory holding the controller UI's `index.html`.
    pub page_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: lookup("RELAY_BIND")
                .and_then(|addr| addr.trim().parse().ok())
                .unwrap_or(defaults.bind_addr),
            port: lookup("PORT")
                .and_then(|port| port.trim().parse().ok())
                .unwrap_or(defaults.port),
            page_dir: lookup("RELAY_PAGE_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.page_dir),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            page_dir: PathBuf::from(DEFAULT_PAGE_DIR),
        }
    }
}
