//! Server Configuration
//!
//! Resolves which configuration file the server runs with.

use fleet_telemetry::config::Config;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "TELEMETRY_CONFIG";

/// Default configuration file in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "application.toml";

/// Where the loaded configuration came from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// `--config`
    Flag(PathBuf),
    /// `TELEMETRY_CONFIG`
    Env(PathBuf),
    /// `./application.toml`
    WorkingDir(PathBuf),
    /// Built-in defaults plus environment overrides
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Flag(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::Env(p) => write!(f, "{} ({})", p.display(), CONFIG_ENV),
            ConfigSource::WorkingDir(p) => write!(f, "{}", p.display()),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

/// Load configuration
///
/// Priority:
/// 1. `--config` flag (a load failure is fatal)
/// 2. `TELEMETRY_CONFIG` environment variable
/// 3. `./application.toml`
/// 4. Default configuration
///
/// Environment overrides are applied in every case. Logging is not set up
/// yet when this runs, so notices go to stderr.
pub fn load_config(flag: Option<&Path>) -> Result<(Config, ConfigSource), String> {
    if let Some(path) = flag {
        let config = Config::from_file_with_env(path)?;
        return Ok((config, ConfigSource::Flag(path.to_path_buf())));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(path);
        match Config::from_file_with_env(&path) {
            Ok(config) => return Ok((config, ConfigSource::Env(path))),
            Err(e) => eprintln!("[config] {}. Trying {}.", e, DEFAULT_CONFIG_FILE),
        }
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        match Config::from_file_with_env(default_path) {
            Ok(config) => {
                return Ok((config, ConfigSource::WorkingDir(default_path.to_path_buf())))
            }
            Err(e) => eprintln!("[config] {}. Using defaults.", e),
        }
    }

    Ok((Config::from_env(), ConfigSource::Defaults))
}

/// Mask the password in a connection URL for display
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((auth, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match auth.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}
