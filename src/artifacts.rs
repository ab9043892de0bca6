use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Receives every file produced by a run, once all releases are written.
pub trait ArtifactSink {
    fn upload(&self, name: &str, files: &[PathBuf]) -> Result<()>;
}

/// Copies artifacts into `{directory}/{name}/`, keeping their relative layout,
/// for a later upload step of the pipeline.
pub struct DirectorySink {
    directory: PathBuf,
    root: PathBuf,
}

impl DirectorySink {
    /// `root` is the directory release files were written under.
    pub fn new(directory: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            root: root.into(),
        }
    }

    fn destination(&self, name: &str, file: &Path) -> PathBuf {
        let relative = file.strip_prefix(&self.root).unwrap_or(file);
        let relative: PathBuf = relative
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        self.directory.join(name).join(relative)
    }
}

impl ArtifactSink for DirectorySink {
    fn upload(&self, name: &str, files: &[PathBuf]) -> Result<()> {
        for file in files {
            let destination = self.destination(name, file);
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::copy(file, &destination).with_context(|| {
                format!("copying {} to {}", file.display(), destination.display())
            })?;
        }

        log::info!(
            "Staged {} file(s) as artifact {} in {}",
            files.len(),
            name,
            self.directory.display()
        );
        Ok(())
    }
}
