#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gradewatch::config::ConfigFile;
use gradewatch::detect::{LanguageDetector, ResultDetector};
use gradewatch::exec::ExecutorBackend;
use gradewatch::fs::{FileSystem, RealFileSystem};
use gradewatch::layout::Layout;
use gradewatch::stages::{GradeStage, SyncStage};
use tempfile::TempDir;

pub use gradewatch_test_utils::{
    capture_logs, init_tracing, with_timeout, ConfigFileBuilder, FakeExecutor,
};

/// An on-disk entities tree in a temp directory, using the default layout
/// names (`entities/<id>/workingCopy`, `entities/<id>/grading`).
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Config builder rooted at this workspace.
    pub fn config(&self) -> ConfigFileBuilder {
        ConfigFileBuilder::new().root(self.root())
    }

    pub fn layout(&self, cfg: &ConfigFile) -> Layout {
        Layout::new(&cfg.layout, self.root())
    }

    pub fn entity_dir(&self, id: &str) -> PathBuf {
        self.root().join("entities").join(id)
    }

    pub fn working_copy(&self, id: &str) -> PathBuf {
        self.entity_dir(id).join("workingCopy")
    }

    pub fn problem_dir(&self, id: &str, period: &str) -> PathBuf {
        self.working_copy(id).join("problem").join(period)
    }

    pub fn grading_dir(&self, id: &str, period: &str) -> PathBuf {
        self.entity_dir(id).join("grading").join(period)
    }

    /// Entity with a working copy and nothing else.
    pub fn add_entity(&self, id: &str) -> &Self {
        fs::create_dir_all(self.working_copy(id)).expect("create working copy");
        self
    }

    /// Entity that was never cloned.
    pub fn add_uncloned_entity(&self, id: &str) -> &Self {
        fs::create_dir_all(self.entity_dir(id)).expect("create entity dir");
        self
    }

    /// Put `file` into the entity's problem folder for `period` and make sure
    /// the matching grading folder exists.
    pub fn add_submission(&self, id: &str, period: &str, file: &str, contents: &str) -> &Self {
        self.write(self.problem_dir(id, period).join(file), contents);
        fs::create_dir_all(self.grading_dir(id, period)).expect("create grading dir");
        self
    }

    pub fn write(&self, path: impl AsRef<Path>, contents: &str) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn marker(&self, id: &str, period: &str, name: &str) -> PathBuf {
        self.grading_dir(id, period).join(name)
    }
}

pub fn real_fs() -> Arc<dyn FileSystem> {
    Arc::new(RealFileSystem)
}

pub fn sync_stage(ws: &Workspace, cfg: &ConfigFile, executor: Arc<dyn ExecutorBackend>) -> SyncStage {
    SyncStage::new(
        executor,
        real_fs(),
        Arc::new(ws.layout(cfg)),
        cfg.sync.clone(),
    )
}

pub fn grade_stage(
    ws: &Workspace,
    cfg: &ConfigFile,
    executor: Arc<dyn ExecutorBackend>,
) -> Arc<GradeStage> {
    Arc::new(GradeStage::new(
        executor,
        real_fs(),
        Arc::new(ws.layout(cfg)),
        ResultDetector::new(&cfg.results),
        LanguageDetector::new(&cfg.languages).expect("valid languages"),
        cfg.grading.clone(),
        cfg.limits,
        cfg.results.explanation_file.clone(),
    ))
}
