use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

/// File each test case's stdin blob is staged into for container runs
pub const CASE_INPUT_FILE: &str = "input.txt";

/// Creates and removes per-submission directories under `<root>/<language>/<id>/`
pub struct WorkspaceStore {
    root: PathBuf,
}

/// One submission's scratch directory
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn case_input_path(&self) -> PathBuf {
        self.dir.join(CASE_INPUT_FILE)
    }
}

impl WorkspaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create workspace root {}", root.display()))?;
        Ok(Self { root })
    }

    /// Per-user cache location used when the configuration names no root
    pub fn default_root() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "codebox")
            .context("no home directory to place workspaces under")?;
        Ok(dirs.cache_dir().join("workspaces"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a fresh directory keyed by language and a time-ordered id
    pub fn create(&self, language: &str) -> Result<Workspace> {
        let id = Uuid::now_v7().to_string();
        let dir = self.root.join(language).join(&id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create workspace {}", dir.display()))?;
        log::debug!("workspace {id} created at {}", dir.display());
        Ok(Workspace { id, dir })
    }

    /// Writes the submitted source into the workspace with one trailing newline
    pub fn write_source(
        &self,
        workspace: &Workspace,
        file_name: &str,
        source: &str,
    ) -> Result<PathBuf> {
        let path = workspace.dir.join(file_name);
        let mut text = source.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        fs::write(&path, text)
            .with_context(|| format!("failed to save source to {}", path.display()))?;
        Ok(path)
    }

    /// Removes the workspace directory; problems are logged, never raised
    pub fn destroy(&self, workspace: Workspace) {
        if !workspace.dir.exists() {
            log::debug!("workspace {} already gone", workspace.id);
            return;
        }
        match fs::remove_dir_all(&workspace.dir) {
            Ok(()) => log::info!("workspace {} removed", workspace.id),
            Err(e) => log::error!("failed to remove workspace {}: {e}", workspace.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_places_directory_under_language() {
        let root = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(root.path()).unwrap();
        let workspace = store.create("java").unwrap();
        assert!(workspace.dir().is_dir());
        assert!(workspace.dir().starts_with(root.path().join("java")));
        assert!(workspace.dir().ends_with(workspace.id()));
    }

    #[test]
    fn workspace_ids_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(root.path()).unwrap();
        let first = store.create("cpp").unwrap();
        let second = store.create("cpp").unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn write_source_adds_single_trailing_newline() {
        let root = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(root.path()).unwrap();
        let workspace = store.create("java").unwrap();

        let path = store
            .write_source(&workspace, "Main.java", "class Main {}")
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "class Main {}\n");

        let path = store
            .write_source(&workspace, "Main.java", "class Main {}\n")
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "class Main {}\n");
    }

    #[test]
    fn destroy_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(root.path()).unwrap();
        let workspace = store.create("java").unwrap();
        let dir = workspace.dir().to_path_buf();
        store.destroy(workspace);
        assert!(!dir.exists());
    }

    #[test]
    fn destroy_tolerates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(root.path()).unwrap();
        let workspace = store.create("java").unwrap();
        fs::remove_dir_all(workspace.dir()).unwrap();
        store.destroy(workspace);
    }
}
