//! Outputs handed back to the invoking pipeline.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const DELIMITER: &str = "__RELEASE_RESOLVER_EOF__";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Release directories in the order they were written.
    pub releases: Vec<PathBuf>,
    pub message: String,
    pub hostname: Option<String>,
}

impl RunSummary {
    pub fn releases_line(&self) -> String {
        self.releases
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Renders outputs in the `name=value` / `name<<DELIM` step output format.
pub fn render_step_outputs(summary: &RunSummary) -> String {
    let mut out = format!("releases={}\n", summary.releases_line());
    if !summary.message.is_empty() {
        out.push_str(&format!("message<<{0}\n{1}\n{0}\n", DELIMITER, summary.message));
    }
    if let Some(hostname) = &summary.hostname {
        out.push_str(&format!("hostname={}\n", hostname));
    }
    out
}

pub fn write_step_outputs(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening step output file {}", path.display()))?;
    file.write_all(render_step_outputs(summary).as_bytes())
        .with_context(|| format!("writing step output file {}", path.display()))?;
    Ok(())
}
