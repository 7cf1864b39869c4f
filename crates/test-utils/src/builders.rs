#![allow(dead_code)]

use std::path::Path;

use gradewatch::config::{ConfigFile, LanguageConfig, RawConfigFile};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the documented defaults, with resource limits off so tests do
/// not depend on the host's rlimits.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.limits.enabled = false;
        Self { config }
    }

    /// Directory containing `entities/`.
    pub fn root(mut self, root: impl AsRef<Path>) -> Self {
        self.config.layout.root = root.as_ref().to_path_buf();
        self
    }

    pub fn periods(mut self, valid: &[&str], current: &str) -> Self {
        self.config.periods.valid = valid.iter().map(|p| p.to_string()).collect();
        self.config.periods.current = Some(current.to_string());
        self
    }

    /// Add a language. The first call replaces the built-in language table.
    pub fn language(mut self, language: LanguageConfig) -> Self {
        self.config.language.get_or_insert_with(Vec::new).push(language);
        self
    }

    pub fn sync_command(mut self, command: &str) -> Self {
        self.config.sync.command = command.to_string();
        self
    }

    pub fn sync_timeout(mut self, timeout: &str) -> Self {
        self.config.sync.timeout = timeout.to_string();
        self
    }

    pub fn grading_timeout(mut self, timeout: &str) -> Self {
        self.config.grading.timeout = timeout.to_string();
        self
    }

    /// Grading script file name and the program used to run it.
    pub fn grading_script(mut self, script: &str, interpreter: &str) -> Self {
        self.config.grading.script = script.to_string();
        self.config.grading.interpreter = interpreter.to_string();
        self
    }

    pub fn interval(mut self, interval: &str, error_backoff: &str) -> Self {
        self.config.scheduler.interval = interval.to_string();
        self.config.scheduler.error_backoff = error_backoff.to_string();
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.executor.max_concurrent = n;
        self
    }

    pub fn kill_grace(mut self, grace: &str) -> Self {
        self.config.executor.kill_grace = grace.to_string();
        self
    }

    pub fn with_limits(mut self) -> Self {
        self.config.limits.enabled = true;
        self
    }

    pub fn legacy_markers(mut self, enabled: bool) -> Self {
        self.config.results.legacy_markers = enabled;
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
