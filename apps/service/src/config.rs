use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum Error {
    ReadFailed(()),
    WriteFailed(()),
    ParseFailed(()),
    ConfigPathUnavailable,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub database: Database,
    pub probe: Probe,
    pub queue: Queue,
    pub notifications: Notifications,
    pub sweeper: Sweeper,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Probe {
    /// Hard whole-request timeout, seconds.
    pub timeout_seconds: u64,
    /// Maximum redirect hops to follow.
    pub max_redirects: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Queue {
    /// Lane name for delayed monitoring tasks.
    pub lane: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Notifications {
    /// Optional webhook endpoint; notifications always go to the log.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Sweeper {
    pub interval_seconds: u64,
    pub fail_after_seconds: i64,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: Database { path: "vigil.db".into() },
            probe: Probe { timeout_seconds: 30, max_redirects: 5 },
            queue: Queue { lane: "monitor".into() },
            notifications: Notifications { webhook_url: None },
            sweeper: Sweeper { interval_seconds: 300, fail_after_seconds: 600 },
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current Internal Configuration State:")?;
        writeln!(f, "  Database")?;
        writeln!(f, "    Path: {}", self.database.path)?;
        writeln!(f, "  Probe")?;
        writeln!(f, "    Timeout: {}s", self.probe.timeout_seconds)?;
        writeln!(f, "    Max Redirects: {}", self.probe.max_redirects)?;
        writeln!(f, "  Queue")?;
        writeln!(f, "    Lane: {}", self.queue.lane)?;
        writeln!(f, "  Notifications")?;
        writeln!(
            f,
            "    Webhook: {}",
            self.notifications.webhook_url.as_deref().unwrap_or("(log only)")
        )?;
        writeln!(f, "  Sweeper")?;
        writeln!(f, "    Interval: {}s", self.sweeper.interval_seconds)?;
        writeln!(f, "    Fail After: {}s", self.sweeper.fail_after_seconds)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string =
                fs::read_to_string(&config_path).map_err(|_err| Error::ReadFailed(()))?;
            toml::from_str(raw_string.as_str()).map_err(|_err| Error::ParseFailed(()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|_err| Error::ParseFailed(()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_err| Error::WriteFailed(()))?;
        }

        std::fs::write(path, config_str).map_err(|_err| Error::WriteFailed(()))
    }
}
