//! Profile configuration.
//!
//! Profiles map a short name to a master file path so commands don't need
//! `--esm` every run. The config lives in a TOML file under the OS config
//! directory (overridable with `UNESM_CONFIG_DIR` for tests and scripting).
//!
//! Resolution order for the active master: explicit `--esm` path, then
//! `--profile`, then the default profile, then an error with setup guidance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    pub esm: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// Directory holding `config.toml`.
///
/// `$UNESM_CONFIG_DIR` wins, else the OS config dir.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("UNESM_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unesm")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// The localization archive ships next to the master file.
pub fn derive_ba2_path(esm: &Path) -> PathBuf {
    esm.parent()
        .unwrap_or_else(|| Path::new("."))
        .join("SeventySix - Localization.ba2")
}

/// Profile names must be valid TOML bare keys.
pub fn validate_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl Config {
    /// Read the config file; a missing file is an empty config.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::ConfigMissing(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigMissing(format!("cannot serialize config: {}", e)))?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Resolve the active master file path.
    pub fn resolve_esm(&self, explicit: Option<&Path>, profile: Option<&str>) -> Result<PathBuf> {
        if let Some(esm) = explicit {
            if !esm.is_file() {
                return Err(Error::ConfigMissing(format!(
                    "master file not found: {}",
                    esm.display()
                )));
            }
            return Ok(esm.to_path_buf());
        }

        let name = profile
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .ok_or_else(|| {
                Error::ConfigMissing(
                    "no master file given. Run 'unesm init' to set up a profile, \
                     or pass --esm <path> / --profile <name>"
                        .into(),
                )
            })?;

        self.profile_esm(&name)
    }

    /// Resolve one named profile to its master file path.
    pub fn profile_esm(&self, name: &str) -> Result<PathBuf> {
        let profile = self.profiles.get(name).ok_or_else(|| {
            let available = self
                .profiles
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            Error::ConfigMissing(format!(
                "profile '{}' not found. Available profiles: {}",
                name,
                if available.is_empty() { "(none)" } else { available.as_str() }
            ))
        })?;

        if !profile.esm.is_file() {
            return Err(Error::ConfigMissing(format!(
                "master file for profile '{}' not found: {}. Run 'unesm init' to update it",
                name,
                profile.esm.display()
            )));
        }
        Ok(profile.esm.clone())
    }
}
