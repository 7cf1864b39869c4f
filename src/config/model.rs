// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::ResourceLimits;
use crate::types::Period;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [layout]
/// entities_dir = "entities"
///
/// [sync]
/// command = "git pull"
/// timeout = "30s"
///
/// [periods]
/// valid = ["week01", "week02"]
/// current = "week01"
///
/// [[language]]
/// name = "python"
/// source_extensions = [".py"]
/// run_command = "python3 main.py"
/// ```
///
/// All sections are optional and have reasonable defaults. Durations are
/// strings such as `"250ms"`, `"30s"`, `"1m"`.
///
/// This is the unvalidated form; the rest of the crate consumes
/// [`ConfigFile`], obtained via `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub layout: LayoutSection,

    #[serde(default)]
    pub executor: RawExecutorSection,

    #[serde(default)]
    pub sync: RawSyncSection,

    #[serde(default)]
    pub grading: RawGradingSection,

    #[serde(default)]
    pub limits: RawLimitsSection,

    #[serde(default)]
    pub scheduler: RawSchedulerSection,

    #[serde(default)]
    pub periods: RawPeriodsSection,

    #[serde(default)]
    pub results: ResultsSection,

    /// Ordered language table. Order is the detection tie-break, which is why
    /// this is an array of tables rather than a map.
    ///
    /// `None` means "not configured": the built-in languages are used.
    #[serde(default)]
    pub language: Option<Vec<LanguageConfig>>,
}

/// `[layout]` section: where entities live on disk.
///
/// For an entity `S1` and period `week01`:
///
/// - working copy: `<root>/<entities_dir>/S1/<working_copy>/`
/// - submission:   `<working copy>/<problem_dir>/week01/`
/// - grading:      `<root>/<entities_dir>/S1/<grading_dir>/week01/`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutSection {
    /// Base directory. Relative paths are resolved against the directory of
    /// the config file.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default = "default_entities_dir")]
    pub entities_dir: String,

    #[serde(default = "default_working_copy")]
    pub working_copy: String,

    #[serde(default = "default_grading_dir")]
    pub grading_dir: String,

    #[serde(default = "default_problem_dir")]
    pub problem_dir: String,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_entities_dir() -> String {
    "entities".to_string()
}

fn default_working_copy() -> String {
    "workingCopy".to_string()
}

fn default_grading_dir() -> String {
    "grading".to_string()
}

fn default_problem_dir() -> String {
    "problem".to_string()
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            entities_dir: default_entities_dir(),
            working_copy: default_working_copy(),
            grading_dir: default_grading_dir(),
            problem_dir: default_problem_dir(),
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawExecutorSection {
    /// Maximum number of subprocesses running at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long a timed-out process gets between the termination request and
    /// the forced kill.
    #[serde(default = "default_kill_grace")]
    pub kill_grace: String,

    /// Per-stream cap on captured stdout / stderr.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_kill_grace() -> String {
    "5s".to_string()
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for RawExecutorSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            kill_grace: default_kill_grace(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSyncSection {
    /// Shell command run inside every working copy.
    #[serde(default = "default_sync_command")]
    pub command: String,

    #[serde(default = "default_job_timeout")]
    pub timeout: String,
}

fn default_sync_command() -> String {
    "git pull".to_string()
}

fn default_job_timeout() -> String {
    "30s".to_string()
}

impl Default for RawSyncSection {
    fn default() -> Self {
        Self {
            command: default_sync_command(),
            timeout: default_job_timeout(),
        }
    }
}

/// `[grading]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGradingSection {
    /// Timeout applied to both the compile step and the grading program.
    #[serde(default = "default_job_timeout")]
    pub timeout: String,

    /// Per-period grading script looked up in the period grading folder. When
    /// present it takes precedence over the language `run_command`.
    #[serde(default = "default_script")]
    pub script: String,

    /// Program used to run `script`. The script receives the submission
    /// folder as its only argument.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

fn default_script() -> String {
    "grade.py".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

impl Default for RawGradingSection {
    fn default() -> Self {
        Self {
            timeout: default_job_timeout(),
            script: default_script(),
            interpreter: default_interpreter(),
        }
    }
}

/// `[limits]` section: best-effort resource limits for grading jobs.
///
/// Any individual limit can be switched off by setting it to `0`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLimitsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cpu_seconds")]
    pub cpu_seconds: u64,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: u64,

    #[serde(default = "default_max_processes")]
    pub max_processes: u64,
}

fn default_true() -> bool {
    true
}

fn default_cpu_seconds() -> u64 {
    30
}

fn default_memory_mb() -> u64 {
    1024
}

fn default_file_size_mb() -> u64 {
    50
}

fn default_max_processes() -> u64 {
    256
}

impl Default for RawLimitsSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cpu_seconds: default_cpu_seconds(),
            memory_mb: default_memory_mb(),
            file_size_mb: default_file_size_mb(),
            max_processes: default_max_processes(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSchedulerSection {
    /// Target time between cycle starts.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Sleep after a failed cycle. Must be shorter than `interval`.
    #[serde(default = "default_error_backoff")]
    pub error_backoff: String,
}

fn default_interval() -> String {
    "60s".to_string()
}

fn default_error_backoff() -> String {
    "10s".to_string()
}

impl Default for RawSchedulerSection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            error_backoff: default_error_backoff(),
        }
    }
}

/// `[periods]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPeriodsSection {
    #[serde(default = "default_valid_periods")]
    pub valid: Vec<Period>,

    /// Defaults to the first valid period.
    #[serde(default)]
    pub current: Option<Period>,
}

fn default_valid_periods() -> Vec<Period> {
    vec!["week01".to_string()]
}

impl Default for RawPeriodsSection {
    fn default() -> Self {
        Self {
            valid: default_valid_periods(),
            current: None,
        }
    }
}

/// `[results]` section: marker-file protocol with grading programs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResultsSection {
    #[serde(default = "default_pass_file")]
    pub pass_file: String,

    #[serde(default = "default_fail_file")]
    pub fail_file: String,

    /// Human-readable explanation written next to the marker.
    #[serde(default = "default_explanation_file")]
    pub explanation_file: String,

    /// Also honour the older `<period>_pass` / `pass` style markers in the
    /// entity grading folder.
    #[serde(default = "default_true")]
    pub legacy_markers: bool,
}

fn default_pass_file() -> String {
    "results.pass".to_string()
}

fn default_fail_file() -> String {
    "results.fail".to_string()
}

fn default_explanation_file() -> String {
    "results.log".to_string()
}

impl Default for ResultsSection {
    fn default() -> Self {
        Self {
            pass_file: default_pass_file(),
            fail_file: default_fail_file(),
            explanation_file: default_explanation_file(),
            legacy_markers: default_true(),
        }
    }
}

/// One `[[language]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LanguageConfig {
    pub name: String,

    /// File extensions including the leading dot, e.g. `[".cpp", ".cc"]`.
    pub source_extensions: Vec<String>,

    /// Shell command run in the submission folder before `run_command`.
    #[serde(default)]
    pub compile_command: Option<String>,

    /// Shell command run in the submission folder when no per-period grading
    /// script exists.
    pub run_command: String,
}

impl LanguageConfig {
    pub fn new(
        name: impl Into<String>,
        extensions: &[&str],
        compile_command: Option<&str>,
        run_command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_extensions: extensions.iter().map(|e| e.to_string()).collect(),
            compile_command: compile_command.map(str::to_string),
            run_command: run_command.into(),
        }
    }
}

/// Languages used when the config file has no `[[language]]` entries.
pub fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig::new("java", &[".java"], Some("javac *.java"), "java Main"),
        LanguageConfig::new("python", &[".py"], None, "python3 main.py"),
        LanguageConfig::new(
            "cpp",
            &[".cpp", ".cc", ".cxx"],
            Some("g++ -O2 -o main *.cpp"),
            "./main",
        ),
    ]
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// Validated configuration consumed by the rest of the crate.
///
/// Build one with `ConfigFile::try_from(RawConfigFile)`: every instance the
/// crate sees has passed validation once, and nothing downstream re-checks or
/// substitutes defaults.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub layout: LayoutSection,
    pub executor: ExecutorSettings,
    pub sync: SyncSettings,
    pub grading: GradingSettings,
    /// `None` when `[limits].enabled = false`.
    pub limits: Option<ResourceLimits>,
    pub scheduler: SchedulerSettings,
    pub periods: PeriodSettings,
    pub results: ResultsSection,
    pub languages: Vec<LanguageConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub max_concurrent: usize,
    pub kill_grace: Duration,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub command: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingSettings {
    pub timeout: Duration,
    pub script: String,
    pub interpreter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub error_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSettings {
    pub valid: Vec<Period>,
    pub current: Period,
}
