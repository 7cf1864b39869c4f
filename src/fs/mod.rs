// src/fs/mod.rs

//! Filesystem seam used by the result detector, language detection and the
//! grade stage. Subprocesses always see the real filesystem; only the
//! orchestrator's own reads and marker writes go through this trait.

use std::fmt::Debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    /// Create or truncate `path`, creating missing parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    /// True for a symbolic link itself, whatever it points at.
    fn is_symlink(&self, path: &Path) -> bool;
    /// Last modification time, if the backend knows it.
    fn modified(&self, path: &Path) -> Option<SystemTime>;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file = fs::File::create(path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents).with_context(|| format!("writing to file {:?}", path))?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("removing file {:?}", path))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating dir {:?}", path))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_symlink(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    fn modified(&self, path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }
}

/// Collect every regular file below `root`, depth-unbounded.
///
/// Symlinked directories are not entered, so a submission cannot make the
/// walk loop. Symlinked files are still listed.
///
/// Returned paths are relative to `root`, use forward slashes and are sorted.
pub fn collect_files(fs: &dyn FileSystem, root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            if fs.is_dir(&path) {
                if !fs.is_symlink(&path) {
                    stack.push(path);
                }
            } else if fs.is_file(&path) {
                if let Ok(rel) = path.strip_prefix(root) {
                    files.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::mock::MockFileSystem;
    use super::*;

    #[test]
    fn collect_files_walks_nested_directories() {
        let fs = MockFileSystem::new();
        fs.add_file("sub/a.py", b"");
        fs.add_file("sub/deep/er/b.java", b"");
        fs.add_file("top.txt", b"");

        let files = collect_files(&fs, Path::new("sub")).unwrap();
        assert_eq!(files, vec!["a.py".to_string(), "deep/er/b.java".to_string()]);
    }

    #[test]
    fn collect_files_does_not_enter_symlinked_dirs() {
        let fs = MockFileSystem::new();
        fs.add_file("sub/notes.txt", b"");
        fs.add_file("sub/loop/Main.java", b"");
        fs.add_symlinked_dir("sub/loop");

        let files = collect_files(&fs, Path::new("sub")).unwrap();
        assert_eq!(files, vec!["notes.txt".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn real_fs_walk_terminates_on_self_referencing_links() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("week01");
        std::fs::create_dir_all(sub.join("src")).unwrap();
        std::fs::write(sub.join("notes.txt"), "").unwrap();
        std::fs::write(sub.join("src/Main.java"), "").unwrap();
        symlink(".", sub.join("a")).unwrap();
        symlink(".", sub.join("b")).unwrap();

        let fs = RealFileSystem;
        assert!(fs.is_symlink(&sub.join("a")));
        assert!(!fs.is_symlink(&sub.join("src")));

        let files = collect_files(&fs, &sub).unwrap();
        assert_eq!(files, vec!["notes.txt".to_string(), "src/Main.java".to_string()]);
    }

    #[test]
    fn real_fs_write_creates_parents_and_remove_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let file = dir.path().join("x/y/z.txt");

        fs.write(&file, b"hi").unwrap();
        assert!(fs.is_file(&file));
        assert!(fs.modified(&file).is_some());
        assert_eq!(fs.read_to_string(&file).unwrap(), "hi");

        fs.remove_file(&file).unwrap();
        assert!(!fs.exists(&file));
    }
}
