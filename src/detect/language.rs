// src/detect/language.rs

use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::LanguageConfig;
use crate::fs::{collect_files, FileSystem};

/// Compiled extension patterns for one configured language.
#[derive(Debug, Clone)]
struct LanguageMatcher {
    language: LanguageConfig,
    set: GlobSet,
}

/// Picks the language of a submission folder.
///
/// Every configured language is compiled into a glob set of `**/*<ext>`
/// patterns. Detection walks the folder recursively and returns the first
/// language, in configuration order, that matches any file.
#[derive(Debug, Clone)]
pub struct LanguageDetector {
    matchers: Vec<LanguageMatcher>,
}

impl LanguageDetector {
    pub fn new(languages: &[LanguageConfig]) -> Result<Self> {
        let mut matchers = Vec::with_capacity(languages.len());
        for language in languages {
            let mut builder = GlobSetBuilder::new();
            for ext in &language.source_extensions {
                let pattern = format!("**/*{ext}");
                let glob = Glob::new(&pattern).with_context(|| {
                    format!("invalid source extension {ext:?} for language {}", language.name)
                })?;
                builder.add(glob);
            }
            let set = builder
                .build()
                .with_context(|| format!("building patterns for language {}", language.name))?;
            matchers.push(LanguageMatcher {
                language: language.clone(),
                set,
            });
        }
        Ok(Self { matchers })
    }

    /// Return the detected language, or `None` when no configured language
    /// has a matching file below `dir`.
    pub fn detect(&self, fs: &dyn FileSystem, dir: &Path) -> Result<Option<&LanguageConfig>> {
        let files = collect_files(fs, dir)?;
        Ok(self.detect_in(&files))
    }

    /// Same as [`detect`](Self::detect) over an already collected file list.
    pub fn detect_in(&self, files: &[String]) -> Option<&LanguageConfig> {
        self.matchers
            .iter()
            .find(|m| files.iter().any(|f| m.set.is_match(f)))
            .map(|m| &m.language)
    }

    pub fn languages(&self) -> impl Iterator<Item = &LanguageConfig> {
        self.matchers.iter().map(|m| &m.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_languages;
    use crate::fs::mock::MockFileSystem;

    fn names(det: &LanguageDetector) -> Vec<&str> {
        det.languages().map(|l| l.name.as_str()).collect()
    }

    #[test]
    fn configuration_order_breaks_ties() {
        let det = LanguageDetector::new(&default_languages()).unwrap();
        assert_eq!(names(&det), vec!["java", "python", "cpp"]);

        let files = vec!["helper.py".to_string(), "src/Main.java".to_string()];
        assert_eq!(det.detect_in(&files).unwrap().name, "java");

        let mut reordered = default_languages();
        reordered.swap(0, 1);
        let det = LanguageDetector::new(&reordered).unwrap();
        assert_eq!(det.detect_in(&files).unwrap().name, "python");
    }

    #[test]
    fn search_is_depth_unbounded() {
        let fs = MockFileSystem::new();
        fs.add_file("sub/a/b/c/d/solver.cc", b"int main() {}");
        fs.add_file("sub/README.md", b"");

        let det = LanguageDetector::new(&default_languages()).unwrap();
        let found = det.detect(&fs, Path::new("sub")).unwrap();
        assert_eq!(found.map(|l| l.name.as_str()), Some("cpp"));
    }

    #[test]
    fn no_matching_files_means_none() {
        let fs = MockFileSystem::new();
        fs.add_file("sub/notes.txt", b"");
        fs.add_file("sub/main.pyc", b"");

        let det = LanguageDetector::new(&default_languages()).unwrap();
        assert!(det.detect(&fs, Path::new("sub")).unwrap().is_none());
    }

    #[test]
    fn bad_extension_is_reported() {
        let langs = vec![LanguageConfig::new("weird", &[".[x"], None, "true")];
        let err = LanguageDetector::new(&langs).unwrap_err();
        assert!(err.to_string().contains("weird"));
    }
}
