// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Configuration file location and loading.

use std::path::{Path, PathBuf};

use scanwerk_core::config::AppConfig;
use scanwerk_core::error::Result;
use tracing::info;

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named on the command line or in `$SCANWERK_CONFIG`; must exist.
    Explicit(PathBuf),
    /// The per-user default location; may be absent.
    Default(PathBuf),
}

impl ConfigSource {
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        match explicit {
            Some(path) => Self::Explicit(path),
            None => Self::Default(config_path()),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Explicit(path) | Self::Default(path) => path,
        }
    }

    /// Read the file, or fall back to built-in defaults when the default
    /// location holds nothing.
    pub fn load(&self) -> Result<AppConfig> {
        match self {
            Self::Default(path) if !path.exists() => {
                info!(path = %path.display(), "no configuration file, using defaults");
                Ok(AppConfig::default())
            }
            _ => AppConfig::load(self.path()),
        }
    }
}

/// `<data dir>/scanwerk/config.json`.
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// The application data directory (not created).
pub fn data_dir() -> PathBuf {
    xdg_data_home(
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
    .join("scanwerk")
}

fn xdg_data_home(xdg: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    // XDG requires an absolute path; anything else is ignored.
    if let Some(xdg) = xdg.filter(|p| p.is_absolute()) {
        return xdg;
    }
    if let Some(home) = home {
        return home.join(".local").join("share");
    }
    // Last resort
    std::env::temp_dir()
}
