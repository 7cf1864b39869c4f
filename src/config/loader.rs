// src/config/loader.rs

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{info, warn};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Parses durations and checks periods, languages, marker names, limits.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a config file that does not exist is not
/// fatal: a warning is logged and the built-in defaults are used.
///
/// A file that exists but cannot be parsed or fails validation is still an
/// error.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    match fs::metadata(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found; using built-in defaults");
            ConfigFile::try_from(RawConfigFile::default())
        }
        _ => {
            let cfg = load_and_validate(path)?;
            info!(path = %path.display(), "configuration loaded");
            Ok(cfg)
        }
    }
}

/// Config file used when `--config` is not given, relative to the current
/// working directory.
pub const DEFAULT_CONFIG_FILE: &str = "Gradewatch.toml";
