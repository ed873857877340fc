//! Environment report shown by `pdfsmith doctor`.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::{Limits, Settings};
use crate::rasterizer::{Ghostscript, Rasterizer};
use crate::utils::format_file_size;

/// What the program found about its surroundings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
    /// Program version.
    pub version: String,
    /// Ghostscript executable, if found.
    pub ghostscript: Option<PathBuf>,
    /// Ghostscript's own version string.
    pub ghostscript_version: Option<String>,
    /// sRGB profile used for PDF/A.
    pub icc_profile: Option<PathBuf>,
    /// Whether compression can run.
    pub compression_available: bool,
    /// Whether PDF/A conversion can run.
    pub pdfa_available: bool,
    /// Where intermediate files go.
    pub temp_dir: PathBuf,
    /// Where checkpoints go.
    pub checkpoint_dir: PathBuf,
    /// Where audit records go.
    pub audit_dir: PathBuf,
    /// Active limits.
    pub limits: Limits,
}

impl EnvironmentReport {
    /// Gather the report.
    pub async fn gather(settings: &Settings, ghostscript: &Ghostscript) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            ghostscript: ghostscript.executable().map(PathBuf::from),
            ghostscript_version: ghostscript.version().await,
            icc_profile: ghostscript.icc_profile().map(PathBuf::from),
            compression_available: ghostscript.is_available(),
            pdfa_available: ghostscript.pdfa_available(),
            temp_dir: settings.temp_dir(),
            checkpoint_dir: settings.checkpoint_dir(),
            audit_dir: settings.audit_dir(),
            limits: settings.limits.clone(),
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn or_missing(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "not found".to_string())
}

impl fmt::Display for EnvironmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pdfsmith {}", self.version)?;
        writeln!(f)?;
        writeln!(f, "  Ghostscript:      {}", or_missing(&self.ghostscript))?;
        if let Some(version) = &self.ghostscript_version {
            writeln!(f, "  Version:          {version}")?;
        }
        writeln!(f, "  ICC profile:      {}", or_missing(&self.icc_profile))?;
        writeln!(f, "  Compression:      {}", yes_no(self.compression_available))?;
        writeln!(f, "  PDF/A:            {}", yes_no(self.pdfa_available))?;
        writeln!(f)?;
        writeln!(f, "  Temp folder:      {}", self.temp_dir.display())?;
        writeln!(f, "  Checkpoints:      {}", self.checkpoint_dir.display())?;
        writeln!(f, "  Audit log:        {}", self.audit_dir.display())?;
        writeln!(f)?;
        writeln!(
            f,
            "  Max file size:    {}",
            format_file_size(self.limits.max_file_size)
        )?;
        writeln!(f, "  Max files:        {}", self.limits.max_files)?;
        writeln!(f, "  Max total pages:  {}", self.limits.max_total_pages)?;
        write!(f, "  Tool timeout:     {}s", self.limits.tool_timeout_secs)
    }
}
