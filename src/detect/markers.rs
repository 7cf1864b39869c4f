// src/detect/markers.rs

//! Result detection from marker files.
//!
//! Grading programs report their verdict by creating a marker file. The
//! naming convention changed over time, so detection walks an ordered list of
//! `(locator, verdict)` rules and the first marker that exists wins:
//!
//! 1. `<grading>/<period>/<pass_file>`  -> pass
//! 2. `<grading>/<period>/<fail_file>`  -> fail
//! 3. `<grading>/<period>_pass`         -> pass  (legacy)
//! 4. `<grading>/<period>_fail`         -> fail  (legacy)
//! 5. `<grading>/pass`                  -> pass  (legacy)
//! 6. `<grading>/fail`                  -> fail  (legacy)
//!
//! When both period markers exist the pass marker wins and the fail marker is
//! deleted.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::ResultsSection;
use crate::fs::FileSystem;
use crate::types::GradeVerdict;

/// Where a marker lives, relative to an entity's grading root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerLocator {
    /// `<grading>/<period>/<name>`
    InPeriodDir(String),
    /// `<grading>/<period><suffix>`, e.g. `week01_pass`.
    PeriodSuffixed(String),
    /// `<grading>/<name>`, independent of the period.
    InGradingRoot(String),
}

impl MarkerLocator {
    pub fn resolve(&self, grading_root: &Path, period: &str) -> PathBuf {
        match self {
            MarkerLocator::InPeriodDir(name) => grading_root.join(period).join(name),
            MarkerLocator::PeriodSuffixed(suffix) => {
                grading_root.join(format!("{period}{suffix}"))
            }
            MarkerLocator::InGradingRoot(name) => grading_root.join(name),
        }
    }

    /// Whether this locator belongs to the current marker convention.
    pub fn is_period_scoped(&self) -> bool {
        matches!(self, MarkerLocator::InPeriodDir(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRule {
    pub locator: MarkerLocator,
    pub verdict: GradeVerdict,
}

/// A marker that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub verdict: GradeVerdict,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

/// Classifies an entity's grading folder into pass / fail / unknown.
#[derive(Debug, Clone)]
pub struct ResultDetector {
    pass_file: String,
    fail_file: String,
    rules: Vec<MarkerRule>,
}

impl ResultDetector {
    pub fn new(results: &ResultsSection) -> Self {
        let mut rules = vec![
            MarkerRule {
                locator: MarkerLocator::InPeriodDir(results.pass_file.clone()),
                verdict: GradeVerdict::Pass,
            },
            MarkerRule {
                locator: MarkerLocator::InPeriodDir(results.fail_file.clone()),
                verdict: GradeVerdict::Fail,
            },
        ];
        if results.legacy_markers {
            rules.extend([
                MarkerRule {
                    locator: MarkerLocator::PeriodSuffixed("_pass".to_string()),
                    verdict: GradeVerdict::Pass,
                },
                MarkerRule {
                    locator: MarkerLocator::PeriodSuffixed("_fail".to_string()),
                    verdict: GradeVerdict::Fail,
                },
                MarkerRule {
                    locator: MarkerLocator::InGradingRoot("pass".to_string()),
                    verdict: GradeVerdict::Pass,
                },
                MarkerRule {
                    locator: MarkerLocator::InGradingRoot("fail".to_string()),
                    verdict: GradeVerdict::Fail,
                },
            ]);
        }

        Self {
            pass_file: results.pass_file.clone(),
            fail_file: results.fail_file.clone(),
            rules,
        }
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    /// Full detection, legacy fallbacks included.
    pub fn detect(&self, fs: &dyn FileSystem, grading_root: &Path, period: &str) -> GradeVerdict {
        self.detect_marker(fs, grading_root, period)
            .map(|d| d.verdict)
            .unwrap_or(GradeVerdict::Unknown)
    }

    /// Like [`detect`](Self::detect), but also reports which marker matched.
    pub fn detect_marker(
        &self,
        fs: &dyn FileSystem,
        grading_root: &Path,
        period: &str,
    ) -> Option<Detection> {
        self.first_match(fs, grading_root, period, self.rules.iter())
    }

    /// Detection restricted to the current, period-scoped markers.
    ///
    /// Used right after a grading run: a stale legacy marker must not stand in
    /// for a program that reported nothing.
    pub fn detect_fresh(
        &self,
        fs: &dyn FileSystem,
        grading_root: &Path,
        period: &str,
    ) -> GradeVerdict {
        let scoped = self.rules.iter().filter(|r| r.locator.is_period_scoped());
        self.first_match(fs, grading_root, period, scoped)
            .map(|d| d.verdict)
            .unwrap_or(GradeVerdict::Unknown)
    }

    fn first_match<'a>(
        &self,
        fs: &dyn FileSystem,
        grading_root: &Path,
        period: &str,
        rules: impl Iterator<Item = &'a MarkerRule>,
    ) -> Option<Detection> {
        self.resolve_conflict(fs, &grading_root.join(period));

        for rule in rules {
            let path = rule.locator.resolve(grading_root, period);
            if fs.is_file(&path) {
                if !rule.locator.is_period_scoped() {
                    debug!(marker = %path.display(), verdict = %rule.verdict, "using legacy marker");
                }
                let modified = fs.modified(&path);
                return Some(Detection {
                    verdict: rule.verdict,
                    path,
                    modified,
                });
            }
        }
        None
    }

    /// Pass wins over fail: delete the fail marker when both are present.
    fn resolve_conflict(&self, fs: &dyn FileSystem, period_dir: &Path) {
        let pass = period_dir.join(&self.pass_file);
        let fail = period_dir.join(&self.fail_file);
        if fs.is_file(&pass) && fs.is_file(&fail) {
            warn!(
                dir = %period_dir.display(),
                "both pass and fail markers present; treating as pass and removing the fail marker"
            );
            if let Err(e) = fs.remove_file(&fail) {
                warn!(marker = %fail.display(), error = %e, "could not remove conflicting fail marker");
            }
        }
    }

    pub fn marker_path(&self, grading_dir: &Path, verdict: GradeVerdict) -> Option<PathBuf> {
        match verdict {
            GradeVerdict::Pass => Some(grading_dir.join(&self.pass_file)),
            GradeVerdict::Fail => Some(grading_dir.join(&self.fail_file)),
            GradeVerdict::Unknown => None,
        }
    }

    /// Remove the period markers in `grading_dir` so a new run starts clean.
    pub fn clear_markers(&self, fs: &dyn FileSystem, grading_dir: &Path) -> Result<()> {
        for name in [&self.pass_file, &self.fail_file] {
            let path = grading_dir.join(name);
            if fs.exists(&path) {
                fs.remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Write the marker for `verdict` (no-op for `Unknown`).
    pub fn write_marker(
        &self,
        fs: &dyn FileSystem,
        grading_dir: &Path,
        verdict: GradeVerdict,
        contents: &str,
    ) -> Result<()> {
        if let Some(path) = self.marker_path(grading_dir, verdict) {
            fs.write(&path, contents.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn detector() -> ResultDetector {
        ResultDetector::new(&ResultsSection::default())
    }

    const ROOT: &str = "entities/S1/grading";

    #[test]
    fn pass_wins_and_fail_marker_is_removed() {
        let fs = MockFileSystem::new();
        fs.add_file("entities/S1/grading/week01/results.pass", b"");
        fs.add_file("entities/S1/grading/week01/results.fail", b"");

        let verdict = detector().detect(&fs, Path::new(ROOT), "week01");

        assert_eq!(verdict, GradeVerdict::Pass);
        assert!(!fs.exists(Path::new("entities/S1/grading/week01/results.fail")));
        assert!(fs.exists(Path::new("entities/S1/grading/week01/results.pass")));
    }

    #[test]
    fn period_markers_take_precedence_over_legacy() {
        let fs = MockFileSystem::new();
        fs.add_file("entities/S1/grading/week01/results.fail", b"");
        fs.add_file("entities/S1/grading/week01_pass", b"");

        assert_eq!(detector().detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Fail);
    }

    #[test]
    fn legacy_chain_is_walked_in_order() {
        let fs = MockFileSystem::new();
        fs.add_file("entities/S1/grading/fail", b"");
        assert_eq!(detector().detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Fail);

        fs.add_file("entities/S1/grading/pass", b"");
        assert_eq!(detector().detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Pass);

        fs.add_file("entities/S1/grading/week01_fail", b"");
        assert_eq!(detector().detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Fail);

        // A different period's legacy marker is irrelevant.
        fs.add_file("entities/S1/grading/week02_pass", b"");
        assert_eq!(detector().detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Fail);
    }

    #[test]
    fn nothing_present_is_unknown() {
        let fs = MockFileSystem::new();
        assert_eq!(detector().detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Unknown);
    }

    #[test]
    fn legacy_rules_can_be_disabled() {
        let results = ResultsSection {
            legacy_markers: false,
            ..ResultsSection::default()
        };
        let det = ResultDetector::new(&results);
        assert_eq!(det.rules().len(), 2);

        let fs = MockFileSystem::new();
        fs.add_file("entities/S1/grading/pass", b"");
        assert_eq!(det.detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Unknown);
    }

    #[test]
    fn fresh_detection_ignores_legacy_markers() {
        let fs = MockFileSystem::new();
        fs.add_file("entities/S1/grading/week01_pass", b"");
        let det = detector();
        assert_eq!(det.detect(&fs, Path::new(ROOT), "week01"), GradeVerdict::Pass);
        assert_eq!(det.detect_fresh(&fs, Path::new(ROOT), "week01"), GradeVerdict::Unknown);
    }

    #[test]
    fn clear_and_write_markers() {
        let fs = MockFileSystem::new();
        let dir = Path::new("entities/S1/grading/week01");
        fs.add_file(dir.join("results.pass"), b"old");

        let det = detector();
        det.clear_markers(&fs, dir).unwrap();
        assert!(!fs.exists(&dir.join("results.pass")));

        det.write_marker(&fs, dir, GradeVerdict::Fail, "compile error").unwrap();
        assert_eq!(fs.read_to_string(&dir.join("results.fail")).unwrap(), "compile error");

        det.write_marker(&fs, dir, GradeVerdict::Unknown, "ignored").unwrap();
        assert_eq!(fs.read_dir(dir).unwrap().len(), 1);
    }
}
