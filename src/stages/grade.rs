// src/stages/grade.rs

//! Grade Stage: compile and run each eligible submission, then read the
//! verdict back from the marker files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::{GradingSettings, LanguageConfig};
use crate::detect::{LanguageDetector, ResultDetector};
use crate::exec::{ExecutorBackend, JobKind, JobOutcome, JobSpec, ResourceLimits};
use crate::fs::{collect_files, FileSystem};
use crate::layout::Layout;
use crate::state::GradeUpdate;
use crate::types::{EntityId, ExitSignal, FailureCategory, GradeVerdict};

/// Result of grading one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeReport {
    pub verdict: GradeVerdict,
    pub category: Option<FailureCategory>,
    pub language: Option<String>,
    /// Short human-readable reason, also written to the explanation file.
    pub detail: String,
}

impl GradeReport {
    fn new(
        verdict: GradeVerdict,
        category: Option<FailureCategory>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            verdict,
            category,
            language: None,
            detail: detail.into(),
        }
    }

    fn with_language(mut self, language: &LanguageConfig) -> Self {
        self.language = Some(language.name.clone());
        self
    }

    pub fn update(&self) -> GradeUpdate {
        GradeUpdate {
            verdict: self.verdict,
            category: self.category,
        }
    }
}

pub struct GradeStage {
    executor: Arc<dyn ExecutorBackend>,
    fs: Arc<dyn FileSystem>,
    layout: Arc<Layout>,
    detector: ResultDetector,
    languages: LanguageDetector,
    settings: GradingSettings,
    limits: Option<ResourceLimits>,
    explanation_file: String,
}

impl GradeStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<dyn ExecutorBackend>,
        fs: Arc<dyn FileSystem>,
        layout: Arc<Layout>,
        detector: ResultDetector,
        languages: LanguageDetector,
        settings: GradingSettings,
        limits: Option<ResourceLimits>,
        explanation_file: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            fs,
            layout,
            detector,
            languages,
            settings,
            limits,
            explanation_file: explanation_file.into(),
        }
    }

    pub fn detector(&self) -> &ResultDetector {
        &self.detector
    }

    /// Grade every entity in `eligible` for `period`.
    ///
    /// Callers pass only entities whose sync succeeded. An entity whose
    /// working copy disappeared since then is skipped and absent from the
    /// result, as is one whose grading task panicked.
    pub async fn grade_all(
        self: &Arc<Self>,
        eligible: &[EntityId],
        period: &str,
    ) -> BTreeMap<EntityId, GradeReport> {
        let mut handles = Vec::with_capacity(eligible.len());
        for id in eligible {
            if !self.fs.is_dir(&self.layout.working_copy(id)) {
                warn!(entity = %id, "working copy vanished after sync; skipping grade");
                continue;
            }
            let stage = Arc::clone(self);
            let entity = id.clone();
            let period = period.to_string();
            let handle = tokio::spawn(async move { stage.grade_one(&entity, &period).await });
            handles.push((id.clone(), handle));
        }

        let mut reports = BTreeMap::new();
        for (id, handle) in handles {
            match handle.await {
                Ok(report) => {
                    reports.insert(id, report);
                }
                Err(e) => error!(entity = %id, error = %e, "grading task aborted"),
            }
        }
        reports
    }

    /// Grade a single entity.
    pub async fn grade_one(&self, id: &str, period: &str) -> GradeReport {
        let problem_dir = self.layout.problem_dir(id, period);
        if !self.fs.is_dir(&problem_dir) {
            info!(entity = id, period, "no submission for period yet");
            return GradeReport::new(
                GradeVerdict::Unknown,
                None,
                "no submission folder for this period",
            );
        }

        let grading_dir = self.layout.grading_dir(id, period);
        if !self.fs.is_dir(&grading_dir) {
            warn!(entity = id, period, path = %grading_dir.display(), "grading folder missing");
            return GradeReport::new(
                GradeVerdict::Unknown,
                Some(FailureCategory::Other),
                "grading folder missing for this period",
            );
        }

        let report = self.evaluate(id, period, &problem_dir, &grading_dir).await;
        self.write_explanation(&grading_dir, id, period, &report);
        info!(
            entity = id,
            period,
            verdict = %report.verdict,
            category = ?report.category,
            language = report.language.as_deref().unwrap_or("-"),
            "graded"
        );
        report
    }

    async fn evaluate(
        &self,
        id: &str,
        period: &str,
        problem_dir: &Path,
        grading_dir: &Path,
    ) -> GradeReport {
        if let Err(e) = self.detector.clear_markers(self.fs.as_ref(), grading_dir) {
            warn!(entity = id, error = %e, "could not clear previous markers");
            return GradeReport::new(
                GradeVerdict::Unknown,
                Some(FailureCategory::Other),
                format!("could not clear previous markers: {e}"),
            );
        }

        let language = match self.scan(problem_dir).await {
            Ok(files) => self.languages.detect_in(&files),
            Err(e) => {
                warn!(entity = id, error = %e, "could not scan submission");
                return GradeReport::new(
                    GradeVerdict::Unknown,
                    Some(FailureCategory::Other),
                    format!("could not scan submission: {e}"),
                );
            }
        };
        let language = match language {
            Some(language) => language,
            None => {
                return GradeReport::new(
                    GradeVerdict::Unknown,
                    Some(FailureCategory::NoLanguageDetected),
                    "no source files of a configured language found",
                );
            }
        };
        debug!(entity = id, language = %language.name, "language detected");

        if let Some(compile) = &language.compile_command {
            let job = JobSpec::shell(JobKind::Compile, compile, problem_dir, self.settings.timeout)
                .for_entity(id)
                .with_limits(self.limits);
            let outcome = self.executor.run(job).await;
            if !outcome.succeeded {
                let detail = format!("compilation failed: {}", outcome.message());
                self.mark(grading_dir, id, GradeVerdict::Fail, &detail);
                return GradeReport::new(
                    GradeVerdict::Fail,
                    Some(FailureCategory::CompileFailure),
                    detail,
                )
                .with_language(language);
            }
        }

        let job = self.grading_job(id, language, problem_dir, grading_dir);
        let outcome = self.executor.run(job).await;

        let grading_root = self.layout.grading_root(id);
        let reported = self.detector.detect_fresh(self.fs.as_ref(), &grading_root, period);
        let verdict = match reported {
            GradeVerdict::Unknown => {
                let fallback = if outcome.succeeded {
                    GradeVerdict::Pass
                } else {
                    GradeVerdict::Fail
                };
                debug!(entity = id, verdict = %fallback, "no marker written; using exit status");
                self.mark(grading_dir, id, fallback, &outcome.message());
                fallback
            }
            reported => reported,
        };

        let (category, detail) = classify(verdict, &outcome);
        GradeReport::new(verdict, category, detail).with_language(language)
    }

    /// List the submission's files on the blocking pool.
    async fn scan(&self, problem_dir: &Path) -> anyhow::Result<Vec<String>> {
        let fs = Arc::clone(&self.fs);
        let dir = problem_dir.to_path_buf();
        tokio::task::spawn_blocking(move || collect_files(fs.as_ref(), &dir)).await?
    }

    /// The per-period grading script wins over the language's run command.
    fn grading_job(
        &self,
        id: &str,
        language: &LanguageConfig,
        problem_dir: &Path,
        grading_dir: &Path,
    ) -> JobSpec {
        let script = grading_dir.join(&self.settings.script);
        let job = if self.fs.is_file(&script) {
            JobSpec::program(
                JobKind::Grade,
                self.settings.interpreter.as_str(),
                vec![
                    self.settings.script.clone(),
                    problem_dir.to_string_lossy().into_owned(),
                ],
                grading_dir,
                self.settings.timeout,
            )
        } else {
            JobSpec::shell(
                JobKind::Grade,
                &language.run_command,
                problem_dir,
                self.settings.timeout,
            )
        };
        job.for_entity(id).with_limits(self.limits)
    }

    fn mark(&self, grading_dir: &Path, id: &str, verdict: GradeVerdict, contents: &str) {
        if let Err(e) = self
            .detector
            .write_marker(self.fs.as_ref(), grading_dir, verdict, contents)
        {
            warn!(entity = id, error = %e, "could not write marker");
        }
    }

    fn write_explanation(&self, grading_dir: &Path, id: &str, period: &str, report: &GradeReport) {
        let category = report
            .category
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        let text = format!(
            "entity: {id}\nperiod: {period}\ngraded_at: {}\nverdict: {}\ncategory: {category}\nlanguage: {}\n\n{}\n",
            Utc::now().to_rfc3339(),
            report.verdict,
            report.language.as_deref().unwrap_or("-"),
            report.detail,
        );
        let path = grading_dir.join(&self.explanation_file);
        if let Err(e) = self.fs.write(&path, text.as_bytes()) {
            warn!(entity = id, error = %e, "could not write explanation");
        }
    }
}

/// Failure bucket for a verdict obtained after the grading program ran.
fn classify(verdict: GradeVerdict, outcome: &JobOutcome) -> (Option<FailureCategory>, String) {
    match verdict {
        GradeVerdict::Pass => (None, "all checks passed".to_string()),
        GradeVerdict::Fail if !outcome.succeeded => {
            let message = outcome.message();
            let detail = if outcome.exit_signal == ExitSignal::Timeout {
                format!("grading program timed out: {message}")
            } else if let Some(code) = outcome.exit_code {
                format!("grading program exited with {code}: {message}")
            } else {
                format!("grading program did not finish: {message}")
            };
            (Some(FailureCategory::RuntimeFailure), detail)
        }
        GradeVerdict::Fail => (
            Some(FailureCategory::Other),
            format!("grading program reported failure: {}", outcome.message()),
        ),
        GradeVerdict::Unknown => (Some(FailureCategory::Other), "no verdict".to_string()),
    }
}
