//! Default paths for siteguardd components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/siteguard/siteguardd.sock` or `/tmp/siteguard-$USER/siteguardd.sock`
//! - Data: `$XDG_DATA_HOME/siteguard` or `~/.local/share/siteguard`
//! - Config: `$XDG_CONFIG_HOME/siteguard/config.toml` or `~/.config/siteguard/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const SITEGUARD_SOCKET_ENV: &str = "SITEGUARD_SOCKET";

/// Environment variable for overriding the data directory
pub const SITEGUARD_DATA_DIR_ENV: &str = "SITEGUARD_DATA_DIR";

const SOCKET_FILENAME: &str = "siteguardd.sock";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "siteguard";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$SITEGUARD_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/siteguard/siteguardd.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/siteguard-$USER/siteguardd.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(SITEGUARD_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Socket path ignoring `$SITEGUARD_SOCKET`; used for config defaults where the
/// override is applied separately by the CLI.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$SITEGUARD_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/siteguard` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/siteguard` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(SITEGUARD_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Data directory ignoring `$SITEGUARD_DATA_DIR`
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default configuration file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}
