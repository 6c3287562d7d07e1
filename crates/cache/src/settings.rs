//! Cache settings
//!
//! Settings come from a TOML file or from defaults; the cache directory falls
//! back to the first writable candidate of:
//!
//! 1. `MEMENTO_CACHE_DIR`
//! 2. `$XDG_CACHE_HOME/memento`
//! 3. the OS cache directory `/memento`
//! 4. `~/.memento/cache`
//! 5. `$TMPDIR/memento/cache`

use crate::decision::FirstUse;
use crate::persist::Format;
use crate::store::OnExists;
use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "MEMENTO_CACHE_DIR";

/// Defaults for persisted computations and stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root directory for cached values; resolved from the environment when unset
    pub cache_dir: Option<PathBuf>,
    /// Read known keys without comparing fingerprints
    pub trust_cache: bool,
    /// Always recompute existing values
    pub clobber: bool,
    /// Storage format for persisted computations
    pub format: Format,
    /// Duplicate-key policy for stores opened from these settings
    pub on_exists: OnExists,
    /// Treatment of values found on disk for keys never seen before
    pub first_use: FirstUse,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: None,
            trust_cache: false,
            clobber: false,
            format: Format::Dataset,
            on_exists: OnExists::Raise,
            first_use: FirstUse::Trust,
        }
    }
}

impl Settings {
    /// Default settings with the cache directory resolved from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cache_dir: Some(cache_root()?),
            ..Self::default()
        })
    }

    /// Parse settings from TOML
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| Error::configuration(format!("Invalid memento settings: {e}")))
    }

    /// Read settings from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::from_toml_str(&raw)
    }

    /// The configured cache directory, or the environment default
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => cache_root(),
        }
    }
}

/// Inputs for determining the cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    memento_cache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.memento_cache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("memento"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("memento"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".memento/cache"));
    }
    candidates.push(inputs.temp_dir.join("memento/cache"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // Existing directories may be read-only (some CI caches are)
        if path.exists() {
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn cache_root() -> Result<PathBuf> {
    let inputs = CacheInputs {
        memento_cache_dir: std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        xdg_cache_home: std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    let root = cache_root_from_inputs(inputs)?;
    tracing::debug!(path = %root.display(), "Resolved cache directory");
    Ok(root)
}
