// src/layout.rs

//! Path conventions for entities on disk.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use crate::config::LayoutSection;
use crate::fs::FileSystem;
use crate::types::EntityId;

/// Resolved directory layout.
///
/// ```text
/// <entities>/<id>/<working_copy>/<problem_dir>/<period>/   submission
/// <entities>/<id>/<grading_dir>/<period>/                 grading assets + markers
/// <entities>/<id>/<grading_dir>/<period>_pass             legacy markers
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    entities: PathBuf,
    working_copy: String,
    grading_dir: String,
    problem_dir: String,
}

impl Layout {
    /// Build a layout whose relative `root` is resolved against `base`.
    pub fn new(section: &LayoutSection, base: &Path) -> Self {
        let root = if section.root.is_absolute() {
            section.root.clone()
        } else {
            base.join(&section.root)
        };
        Self {
            entities: root.join(&section.entities_dir),
            working_copy: section.working_copy.clone(),
            grading_dir: section.grading_dir.clone(),
            problem_dir: section.problem_dir.clone(),
        }
    }

    pub fn entities_root(&self) -> &Path {
        &self.entities
    }

    pub fn entity_dir(&self, id: &str) -> PathBuf {
        self.entities.join(id)
    }

    pub fn working_copy(&self, id: &str) -> PathBuf {
        self.entity_dir(id).join(&self.working_copy)
    }

    /// Root of all grading folders of an entity (legacy markers live here).
    pub fn grading_root(&self, id: &str) -> PathBuf {
        self.entity_dir(id).join(&self.grading_dir)
    }

    pub fn grading_dir(&self, id: &str, period: &str) -> PathBuf {
        self.grading_root(id).join(period)
    }

    pub fn problem_dir(&self, id: &str, period: &str) -> PathBuf {
        self.working_copy(id).join(&self.problem_dir).join(period)
    }

    /// List entity ids: every sub-directory of the entities root, sorted.
    ///
    /// A missing entities root is not an error: it means nothing is tracked
    /// yet. A root that exists but cannot be listed is an error.
    pub fn discover(&self, fs: &dyn FileSystem) -> Result<Vec<EntityId>> {
        if !fs.exists(&self.entities) {
            warn!(path = %self.entities.display(), "entities directory not found; no entities tracked");
            return Ok(Vec::new());
        }

        let mut ids: Vec<EntityId> = fs
            .read_dir(&self.entities)?
            .into_iter()
            .filter(|p| fs.is_dir(p))
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn layout() -> Layout {
        Layout::new(&LayoutSection::default(), Path::new("base"))
    }

    #[test]
    fn paths_follow_the_documented_layout() {
        let l = layout();
        assert_eq!(l.working_copy("S1"), PathBuf::from("base/./entities/S1/workingCopy"));
        assert_eq!(
            l.problem_dir("S1", "week01"),
            PathBuf::from("base/./entities/S1/workingCopy/problem/week01")
        );
        assert_eq!(
            l.grading_dir("S1", "week01"),
            PathBuf::from("base/./entities/S1/grading/week01")
        );
    }

    #[test]
    fn discover_lists_directories_only() {
        let fs = MockFileSystem::new();
        let l = layout();
        fs.add_dir(l.working_copy("S2"));
        fs.add_dir(l.entity_dir("S1"));
        fs.add_dir(l.entity_dir(".cache"));
        fs.add_file(l.entities_root().join("README"), b"");

        assert_eq!(l.discover(&fs).unwrap(), vec!["S1".to_string(), "S2".to_string()]);
    }

    #[test]
    fn missing_entities_root_means_no_entities() {
        let fs = MockFileSystem::new();
        assert!(layout().discover(&fs).unwrap().is_empty());
    }
}
