use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File access rooted in the target project's working tree.
///
/// Every read and write goes through path resolution against the root, so a
/// recipe can never touch files outside the tree it is maintaining. Writes
/// are whole-content replacements: the new text is fully composed in memory
/// and persisted via tempfile + fsync + rename.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Canonical path to the working root
    root: PathBuf,
    /// Canonical paths the engine refuses to touch
    forbidden: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("File is not valid UTF-8: {path}")]
    NotUtf8 {
        path: PathBuf,
        source: std::str::Utf8Error,
    },

    #[error("Path refers to a directory: {path}")]
    IsDirectory { path: PathBuf },

    #[error("Path is outside working root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Path is in a forbidden directory: {path} (forbidden: {forbidden})")]
    Forbidden { path: PathBuf, forbidden: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Workspace {
    /// Open a workspace at the given working root.
    ///
    /// The root is canonicalized so symlinks cannot smuggle an edit outside
    /// the tree. Dependency caches and build output are forbidden even when
    /// they sit inside the root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|source| WorkspaceError::Io {
                path: root.as_ref().to_path_buf(),
                source,
            })?;

        let mut forbidden = Vec::new();

        // In-tree: installed dependencies, VCS internals, build output
        for name in ["node_modules", ".git", "dist", "build"] {
            if let Ok(dir) = root.join(name).canonicalize() {
                forbidden.push(dir);
            }
        }

        // User-level package caches
        if let Some(home) = home::home_dir() {
            for name in [".npm", ".nvm"] {
                if let Ok(dir) = home.join(name).canonicalize() {
                    forbidden.push(dir);
                }
            }
        }

        Ok(Self { root, forbidden })
    }

    /// Get the working root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a file's text content.
    ///
    /// Never panics across the component boundary; absence, bad encoding and
    /// OS failures all come back as tagged errors for the caller to sort.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<String, WorkspaceError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(WorkspaceError::IsDirectory { path: resolved });
        }

        let bytes = match fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound { path: resolved });
            }
            Err(source) => {
                return Err(WorkspaceError::Io {
                    path: resolved,
                    source,
                });
            }
        };

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(err) => Err(WorkspaceError::NotUtf8 {
                path: resolved,
                source: err.utf8_error(),
            }),
        }
    }

    /// Replace a file's content, creating parent directories if missing.
    ///
    /// Line terminators in `content` are written exactly as given. The write
    /// is atomic: either the new content is fully persisted or the original
    /// file is unchanged.
    pub fn write(&self, path: impl AsRef<Path>, content: &str) -> Result<(), WorkspaceError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(WorkspaceError::IsDirectory { path: resolved });
        }

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|source| WorkspaceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        atomic_write(&resolved, content.as_bytes()).map_err(|source| WorkspaceError::Io {
            path: resolved.clone(),
            source,
        })?;

        // Touch mtime so dev-server file watchers pick up the rewrite
        let now = filetime::FileTime::now();
        filetime::set_file_mtime(&resolved, now).map_err(|source| WorkspaceError::Io {
            path: resolved,
            source,
        })?;

        Ok(())
    }

    /// Pure existence check.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        match self.resolve(path) {
            Ok(resolved) => resolved.exists(),
            Err(_) => false,
        }
    }

    /// Resolve a recipe path against the working root and check boundaries.
    ///
    /// Existing paths are canonicalized so symlinks cannot escape; a path
    /// that does not exist yet (create-if-missing targets) is resolved from
    /// its deepest existing ancestor.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let resolved = resolve_missing_tail(&joined);
        self.check_resolved(&resolved)?;
        Ok(resolved)
    }

    fn check_resolved(&self, resolved: &Path) -> Result<(), WorkspaceError> {
        if !resolved.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideRoot {
                path: resolved.to_path_buf(),
                root: self.root.clone(),
            });
        }

        for forbidden in &self.forbidden {
            if resolved.starts_with(forbidden) {
                return Err(WorkspaceError::Forbidden {
                    path: resolved.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }

        Ok(())
    }

    /// Create a workspace with custom forbidden paths (for testing).
    #[cfg(test)]
    pub fn with_forbidden(
        root: impl AsRef<Path>,
        forbidden: Vec<PathBuf>,
    ) -> Result<Self, WorkspaceError> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|source| WorkspaceError::Io {
                path: root.as_ref().to_path_buf(),
                source,
            })?;
        Ok(Self { root, forbidden })
    }
}

/// Canonicalize the deepest existing ancestor and reattach the components
/// below it. `canonicalize` alone fails for targets that do not exist yet.
///
/// Dot components are folded lexically first; `starts_with` compares
/// components without resolving them, so a leftover `..` would defeat the
/// boundary check.
fn resolve_missing_tail(path: &Path) -> PathBuf {
    let mut existing = lexical_normalize(path);
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize().unwrap_or(existing);
    for component in tail.iter().rev() {
        resolved.push(component);
    }
    resolved
}

fn lexical_normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Atomic file write: tempfile in the same directory + fsync + rename.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Path has no parent directory")
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
