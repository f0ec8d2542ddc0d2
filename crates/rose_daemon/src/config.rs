use rose_core::NexusConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

const DATA_DIR: &str = ".rose";

/// Where config and exported files live: `~/.rose`, or `./.rose` when
/// there is no usable home directory.
pub fn rose_data_dir() -> PathBuf {
    data_dir_under(dirs::home_dir())
}

fn data_dir_under(home: Option<PathBuf>) -> PathBuf {
    let dir = match home {
        Some(home) => home.join(DATA_DIR),
        None => {
            warn!(fallback = DATA_DIR, "No home directory");
            return local_data_dir();
        }
    };
    match fs::create_dir_all(&dir) {
        Ok(()) => dir,
        Err(e) => {
            warn!(error = %e, dir = %dir.display(), fallback = DATA_DIR, "Data directory unavailable");
            local_data_dir()
        }
    }
}

fn local_data_dir() -> PathBuf {
    let dir = PathBuf::from(DATA_DIR);
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!(error = %e, "Local data directory unavailable");
    }
    dir
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub monitor: NexusConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Pattern library source. Without a path the built-in priors are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LibraryConfig {
    #[serde(default)]
    pub path: Option<String>,
    /// Re-estimate the library from collected statistics every N ticks (0 = never)
    #[serde(default)]
    pub reestimate_every: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Per-tick results (JSONL). Stdout when unset.
    #[serde(default)]
    pub results: Option<String>,
    /// Visualizer frames (JSONL, one frame per line)
    #[serde(default)]
    pub frames: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Feed polling interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    250
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Config {
    pub fn get_config_path() -> PathBuf {
        let mut path = rose_data_dir();
        path.push("config.toml");
        path
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path())
    }

    /// Read `path`, writing the defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml)?;
        Ok(())
    }
}
