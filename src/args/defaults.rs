use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_LISTEN: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
pub(crate) const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub(crate) fn default_database_path() -> PathBuf {
    default_base_dir().join("servebench.db")
}

pub(crate) fn default_reports_dir() -> PathBuf {
    default_base_dir().join("reports")
}

pub(crate) fn default_datasets_dir() -> PathBuf {
    PathBuf::from("datasets")
}

fn default_base_dir() -> PathBuf {
    if let Some(home) = user_home_dir() {
        return home.join(".servebench");
    }

    PathBuf::from(".servebench")
}

fn user_home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        if let Some(value) = std::env::var_os("USERPROFILE") {
            return Some(PathBuf::from(value));
        }
    }

    std::env::var_os("HOME").map(PathBuf::from)
}
