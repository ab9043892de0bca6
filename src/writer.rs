//! Serializes resolved releases to `{release_name}/values.yaml` and `{release_name}/parameters`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tempfile::NamedTempFile;

use crate::error::WriteError;
use crate::manifest::ReleaseDescriptor;

pub const VALUES_FILE: &str = "values.yaml";
pub const PARAMETERS_FILE: &str = "parameters";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub directory: PathBuf,
    pub values: PathBuf,
    pub parameters: PathBuf,
}

pub struct ReleaseArtifactWriter {
    root: PathBuf,
    written: Vec<ArtifactPaths>,
}

impl ReleaseArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Vec::new(),
        }
    }

    /// Writes one release. The directory depends on the release name only, so
    /// two releases sharing a name overwrite each other.
    pub fn write(&mut self, descriptor: &ReleaseDescriptor) -> Result<ArtifactPaths, WriteError> {
        let release = descriptor.release_name().ok_or(WriteError::MissingReleaseName)?;
        if !is_valid_directory_name(release) {
            return Err(WriteError::InvalidReleaseName(release.to_string()));
        }

        let parameters = render_parameters(release, &descriptor.parameters)?;
        let values = serde_yaml::to_string(&descriptor.values).map_err(|source| WriteError::Serialize {
            release: release.to_string(),
            source,
        })?;

        let directory = self.root.join(release);
        std::fs::create_dir_all(&directory).map_err(|source| io_error(&directory, source))?;

        let paths = ArtifactPaths {
            values: directory.join(VALUES_FILE),
            parameters: directory.join(PARAMETERS_FILE),
            directory,
        };
        write_atomically(&paths.values, values.as_bytes())?;
        write_atomically(&paths.parameters, parameters.as_bytes())?;

        log::info!("Wrote release {} to {}", release, paths.directory.display());
        self.written.push(paths.clone());
        Ok(paths)
    }

    /// Every file produced so far, values before parameters per release.
    pub fn files(&self) -> Vec<PathBuf> {
        self.written
            .iter()
            .flat_map(|p| [p.values.clone(), p.parameters.clone()])
            .collect()
    }
}

fn is_valid_directory_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// `KEY=value` lines with upper-cased keys, in mapping order. Keys and values
/// that would break the one-line-per-parameter shape are rejected.
pub fn render_parameters(release: &str, parameters: &Mapping) -> Result<String, WriteError> {
    let mut out = String::new();
    for (key, value) in parameters {
        let Some(key) = key.as_str() else {
            return Err(WriteError::NonStringParameterKey {
                release: release.to_string(),
            });
        };
        if key.is_empty() || key.contains(|c: char| c == '=' || c.is_whitespace()) {
            return Err(WriteError::InvalidParameterKey {
                release: release.to_string(),
                key: key.to_string(),
            });
        }
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => {
                return Err(WriteError::NonScalarParameter {
                    release: release.to_string(),
                    key: key.to_string(),
                })
            }
        };
        if value.contains(['\n', '\r']) {
            return Err(WriteError::MultiLineParameter {
                release: release.to_string(),
                key: key.to_string(),
            });
        }
        out.push_str(&key.to_uppercase());
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    Ok(out)
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), WriteError> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(directory).map_err(|source| io_error(directory, source))?;
    file.write_all(contents).map_err(|source| io_error(path, source))?;
    file.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> WriteError {
    WriteError::Io {
        path: path.display().to_string(),
        source,
    }
}
