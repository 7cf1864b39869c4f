// src/config/mod.rs

//! Configuration loading and validation for gradewatch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it once into typed settings (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default, DEFAULT_CONFIG_FILE};
pub use model::{
    default_languages, ConfigFile, ExecutorSettings, GradingSettings, LanguageConfig,
    LayoutSection, PeriodSettings, RawConfigFile, ResultsSection, SchedulerSettings,
    SyncSettings,
};
pub use validate::MAX_CONCURRENT_LIMIT;
