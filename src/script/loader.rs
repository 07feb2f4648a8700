use std::fmt;
use std::path::{Path, PathBuf};

use super::schema::{Script, ValidationError};

#[derive(Debug)]
pub enum ScriptError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ScriptError {
    fn with_path(self, path: &Path) -> Self {
        match self {
            ScriptError::Toml { path: None, source } => ScriptError::Toml {
                path: Some(path.to_path_buf()),
                source,
            },
            ScriptError::Validation { path: None, source } => ScriptError::Validation {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Io { path, source } => {
                write!(f, "failed to read script from {}: {}", path.display(), source)
            }
            ScriptError::Toml { path, source } => match path {
                Some(p) => write!(f, "failed to parse script TOML ({}): {}", p.display(), source),
                None => write!(f, "failed to parse script TOML: {source}"),
            },
            ScriptError::Validation { path, source } => match path {
                Some(p) => write!(f, "invalid script ({}): {}", p.display(), source),
                None => write!(f, "invalid script: {source}"),
            },
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Io { source, .. } => Some(source),
            ScriptError::Toml { source, .. } => Some(source),
            ScriptError::Validation { source, .. } => Some(source),
        }
    }
}

/// Parse and validate a script from TOML text.
pub fn load_from_str(input: &str) -> Result<Script, ScriptError> {
    let script: Script =
        toml_edit::de::from_str(input).map_err(|source| ScriptError::Toml { path: None, source })?;
    script
        .validate()
        .map_err(|source| ScriptError::Validation { path: None, source })?;
    Ok(script)
}

/// Read, parse and validate a script file.
pub fn load_from_path(path: &Path) -> Result<Script, ScriptError> {
    let input = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&input).map_err(|err| err.with_path(path))
}
