// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    default_languages, ConfigFile, ExecutorSettings, GradingSettings, LanguageConfig,
    PeriodSettings, RawConfigFile, RawLimitsSection, ResultsSection, SchedulerSettings,
    SyncSettings,
};
use crate::errors::{GradewatchError, Result};
use crate::exec::ResourceLimits;

const MB: u64 = 1024 * 1024;

/// Upper bound for `[executor].max_concurrent`.
pub const MAX_CONCURRENT_LIMIT: usize = 1024;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::GradewatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_layout(&raw)?;

        let executor = ExecutorSettings {
            max_concurrent: raw.executor.max_concurrent,
            kill_grace: duration_field("executor.kill_grace", &raw.executor.kill_grace)?,
            max_output_bytes: raw.executor.max_output_bytes,
        };
        validate_executor(&executor)?;

        let sync = SyncSettings {
            command: non_empty("sync.command", &raw.sync.command)?,
            timeout: positive_duration("sync.timeout", &raw.sync.timeout)?,
        };

        let grading = GradingSettings {
            timeout: positive_duration("grading.timeout", &raw.grading.timeout)?,
            script: path_component("grading.script", &raw.grading.script)?,
            interpreter: non_empty("grading.interpreter", &raw.grading.interpreter)?,
        };

        let scheduler = SchedulerSettings {
            interval: positive_duration("scheduler.interval", &raw.scheduler.interval)?,
            error_backoff: positive_duration(
                "scheduler.error_backoff",
                &raw.scheduler.error_backoff,
            )?,
        };
        if scheduler.error_backoff >= scheduler.interval {
            return Err(config_error(format!(
                "[scheduler].error_backoff ({:?}) must be shorter than interval ({:?})",
                scheduler.error_backoff, scheduler.interval
            )));
        }

        let periods = validate_periods(&raw)?;
        validate_results(&raw.results)?;

        let languages = match raw.language {
            Some(langs) => langs,
            None => default_languages(),
        };
        validate_languages(&languages)?;

        Ok(ConfigFile {
            layout: raw.layout,
            executor,
            sync,
            grading,
            limits: resource_limits(&raw.limits),
            scheduler,
            periods,
            results: raw.results,
            languages,
        })
    }
}

fn validate_layout(raw: &RawConfigFile) -> Result<()> {
    let layout = &raw.layout;
    path_component("layout.entities_dir", &layout.entities_dir)?;
    path_component("layout.working_copy", &layout.working_copy)?;
    path_component("layout.grading_dir", &layout.grading_dir)?;
    path_component("layout.problem_dir", &layout.problem_dir)?;
    if layout.working_copy == layout.grading_dir {
        return Err(config_error(
            "[layout].working_copy and grading_dir must differ",
        ));
    }
    Ok(())
}

fn validate_executor(executor: &ExecutorSettings) -> Result<()> {
    if executor.max_concurrent == 0 {
        return Err(config_error(
            "[executor].max_concurrent must be >= 1 (got 0)",
        ));
    }
    if executor.max_concurrent > MAX_CONCURRENT_LIMIT {
        return Err(config_error(format!(
            "[executor].max_concurrent must be <= {MAX_CONCURRENT_LIMIT} (got {})",
            executor.max_concurrent
        )));
    }
    if executor.max_output_bytes == 0 {
        return Err(config_error(
            "[executor].max_output_bytes must be >= 1 (got 0)",
        ));
    }
    Ok(())
}

fn validate_periods(raw: &RawConfigFile) -> Result<PeriodSettings> {
    let valid = raw.periods.valid.clone();
    if valid.is_empty() {
        return Err(config_error("[periods].valid must list at least one period"));
    }

    let mut seen = HashSet::new();
    for period in valid.iter() {
        path_component("periods.valid", period)?;
        if !seen.insert(period.as_str()) {
            return Err(config_error(format!(
                "[periods].valid lists '{period}' more than once"
            )));
        }
    }

    let current = match raw.periods.current.as_ref() {
        Some(p) if valid.contains(p) => p.clone(),
        Some(p) => {
            return Err(config_error(format!(
                "[periods].current '{p}' is not listed in [periods].valid"
            )));
        }
        None => valid[0].clone(),
    };

    Ok(PeriodSettings { valid, current })
}

fn validate_results(results: &ResultsSection) -> Result<()> {
    let pass = path_component("results.pass_file", &results.pass_file)?;
    let fail = path_component("results.fail_file", &results.fail_file)?;
    let explanation = path_component("results.explanation_file", &results.explanation_file)?;

    if pass == fail || pass == explanation || fail == explanation {
        return Err(config_error(
            "[results] pass_file, fail_file and explanation_file must all differ",
        ));
    }
    Ok(())
}

fn validate_languages(languages: &[LanguageConfig]) -> Result<()> {
    if languages.is_empty() {
        return Err(config_error("at least one [[language]] entry is required"));
    }

    let mut names = HashSet::new();
    for lang in languages {
        if lang.name.trim().is_empty() {
            return Err(config_error("[[language]] entry with an empty name"));
        }
        if !names.insert(lang.name.as_str()) {
            return Err(config_error(format!(
                "language '{}' is defined more than once",
                lang.name
            )));
        }
        if lang.source_extensions.is_empty() {
            return Err(config_error(format!(
                "language '{}' must list at least one source extension",
                lang.name
            )));
        }
        for ext in lang.source_extensions.iter() {
            let bad_char = ext.contains(['/', '\\', '*', '?', '[', ']', '{', '}']);
            if !ext.starts_with('.') || ext.len() < 2 || bad_char {
                return Err(config_error(format!(
                    "language '{}' has invalid extension '{}' (expected e.g. \".py\")",
                    lang.name, ext
                )));
            }
        }
        if lang.run_command.trim().is_empty() {
            return Err(config_error(format!(
                "language '{}' has an empty run_command",
                lang.name
            )));
        }
        if matches!(lang.compile_command.as_deref(), Some(c) if c.trim().is_empty()) {
            return Err(config_error(format!(
                "language '{}' has an empty compile_command (omit it instead)",
                lang.name
            )));
        }
    }
    Ok(())
}

fn resource_limits(raw: &RawLimitsSection) -> Option<ResourceLimits> {
    if !raw.enabled {
        return None;
    }
    let nonzero = |v: u64| (v > 0).then_some(v);
    Some(ResourceLimits {
        cpu_seconds: nonzero(raw.cpu_seconds),
        memory_bytes: nonzero(raw.memory_mb).map(|mb| mb.saturating_mul(MB)),
        file_size_bytes: nonzero(raw.file_size_mb).map(|mb| mb.saturating_mul(MB)),
        max_processes: nonzero(raw.max_processes),
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| config_error(format!("{field}: {e}")))
}

fn positive_duration(field: &str, value: &str) -> Result<Duration> {
    let d = duration_field(field, value)?;
    if d.is_zero() {
        return Err(config_error(format!("{field} must be greater than zero")));
    }
    Ok(d)
}

fn non_empty(field: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(config_error(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

/// Names that are joined onto paths must be a single, plain path component.
fn path_component(field: &str, value: &str) -> Result<String> {
    let value = non_empty(field, value)?;
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(config_error(format!(
            "{field} must be a plain file or folder name (got '{value}')"
        )));
    }
    Ok(value)
}

fn config_error(msg: impl Into<String>) -> GradewatchError {
    GradewatchError::ConfigError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ConfigFile::try_from(RawConfigFile::default()).unwrap();
        assert_eq!(cfg.periods.current, "week01");
        assert_eq!(cfg.executor.max_concurrent, 5);
        assert_eq!(cfg.scheduler.interval, Duration::from_secs(60));
        assert_eq!(cfg.languages[0].name, "java");
        let limits = cfg.limits.unwrap();
        assert_eq!(limits.memory_bytes, Some(1024 * MB));
    }

    #[test]
    fn current_period_defaults_to_first_valid() {
        let mut raw = RawConfigFile::default();
        raw.periods.valid = vec!["w2".into(), "w1".into()];
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert_eq!(cfg.periods.current, "w2");
    }

    #[test]
    fn zero_limits_are_switched_off() {
        let mut raw = RawConfigFile::default();
        raw.limits.max_processes = 0;
        raw.limits.cpu_seconds = 0;
        let limits = ConfigFile::try_from(raw).unwrap().limits.unwrap();
        assert_eq!(limits.max_processes, None);
        assert_eq!(limits.cpu_seconds, None);
        assert!(limits.memory_bytes.is_some());

        let mut raw = RawConfigFile::default();
        raw.limits.enabled = false;
        assert!(ConfigFile::try_from(raw).unwrap().limits.is_none());
    }

    #[test]
    fn backoff_must_be_shorter_than_interval() {
        let mut raw = RawConfigFile::default();
        raw.scheduler.interval = "10s".into();
        raw.scheduler.error_backoff = "10s".into();
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("error_backoff"));
    }

    #[test]
    fn period_names_must_be_plain_folder_names() {
        let mut raw = RawConfigFile::default();
        raw.periods.valid = vec!["../etc".into()];
        assert!(ConfigFile::try_from(raw).is_err());
    }
}
