//! Configuration for pdfsmith.
//!
//! Two layers live here:
//! - [`Limits`]: the resource ceilings and timing budgets every job is held to
//! - [`Settings`]: the persisted operator preferences, stored as JSON in the
//!   platform configuration directory
//!
//! Settings never prevent the program from starting. A missing file yields
//! the defaults; an unreadable or corrupt file is logged and ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PdfSmithError, Result};

/// Environment variable that overrides the rasterizer location.
pub const GHOSTSCRIPT_ENV: &str = "PDFSMITH_GHOSTSCRIPT";

const SETTINGS_FILE: &str = "settings.json";

const MB: u64 = 1024 * 1024;

/// Compression level handed to the external rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Best quality, modest size reduction.
    #[default]
    Max,
    /// Good quality, smaller output.
    Balanced,
    /// Smallest output, reduced image quality.
    Min,
}

impl CompressionLevel {
    /// Rasterizer preset for this level.
    pub fn preset(&self) -> &'static str {
        match self {
            Self::Max => "/printer",
            Self::Balanced => "/ebook",
            Self::Min => "/screen",
        }
    }

    /// Short label used in logs and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Balanced => "balanced",
            Self::Min => "min",
        }
    }
}

impl FromStr for CompressionLevel {
    type Err = PdfSmithError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "max" | "maximum" => Ok(Self::Max),
            "balanced" => Ok(Self::Balanced),
            "min" | "minimum" => Ok(Self::Min),
            _ => Err(PdfSmithError::invalid_config(format!(
                "Invalid compression level: {s}. Must be one of: max, balanced, min"
            ))),
        }
    }
}

/// Resource ceilings and timing budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Limits {
    /// Largest accepted input file, in bytes.
    pub max_file_size: u64,
    /// Largest cumulative page count per job.
    pub max_total_pages: usize,
    /// Largest number of input files per job.
    pub max_files: usize,
    /// Bytes scanned for embedded script markers.
    pub scan_prefix_bytes: usize,
    /// Smallest acceptable output file, in bytes.
    pub min_output_size: u64,
    /// Checkpoints older than this are stale.
    pub checkpoint_max_age_secs: u64,
    /// Wall-clock budget for one external tool run.
    pub tool_timeout_secs: u64,
    /// Wall-clock budget for one kill command.
    pub kill_timeout_secs: u64,
    /// Attempts made by the resilience wrapper before falling back.
    pub retry_attempts: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Numeric suffixes tried before a timestamp suffix is used.
    pub max_name_collisions: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: 500 * MB,
            max_total_pages: 10_000,
            max_files: 100,
            scan_prefix_bytes: 4096,
            min_output_size: 100,
            checkpoint_max_age_secs: 3600,
            tool_timeout_secs: 120,
            kill_timeout_secs: 10,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            max_name_collisions: 1000,
        }
    }
}

impl Limits {
    /// Checkpoint freshness window.
    pub fn checkpoint_max_age(&self) -> Duration {
        Duration::from_secs(self.checkpoint_max_age_secs)
    }

    /// Budget for one rasterizer run.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Budget for one kill command.
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    /// Delay between retry attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Reject ceilings that would make every job fail.
    pub fn validate(&self) -> Result<()> {
        let zeroes = [
            ("maxFileSize", self.max_file_size == 0),
            ("maxTotalPages", self.max_total_pages == 0),
            ("maxFiles", self.max_files == 0),
            ("toolTimeoutSecs", self.tool_timeout_secs == 0),
            ("retryAttempts", self.retry_attempts == 0),
        ];
        if let Some((name, _)) = zeroes.iter().find(|(_, zero)| *zero) {
            return Err(PdfSmithError::invalid_config(format!(
                "{name} must be greater than zero"
            )));
        }
        Ok(())
    }
}

/// Persisted operator preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Resource ceilings.
    pub limits: Limits,
    /// Explicit rasterizer executable.
    pub ghostscript: Option<PathBuf>,
    /// Compression level used when none is given on the command line.
    pub compression: CompressionLevel,
    /// Where audit records are appended.
    pub audit_dir: Option<PathBuf>,
    /// Where checkpoints are written.
    pub checkpoint_dir: Option<PathBuf>,
    /// Where intermediate artifacts are created.
    pub temp_dir: Option<PathBuf>,
}

impl Settings {
    /// Platform location of the settings file, if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Load settings from the platform location.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no configuration directory on this platform, using defaults");
                Self::default()
            }
        }
    }

    /// Load settings from `path`, falling back to defaults on any problem.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read settings, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) => match settings.limits.validate() {
                Ok(()) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid limits in settings, using defaults");
                    Self {
                        limits: Limits::default(),
                        ..settings
                    }
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt settings file, using defaults");
                Self::default()
            }
        }
    }

    /// Write settings to `path` atomically.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Reject settings no job could run under.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()
    }

    /// Rasterizer override from the environment or the settings file.
    pub fn ghostscript_override(&self) -> Option<PathBuf> {
        std::env::var_os(GHOSTSCRIPT_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.ghostscript.clone())
    }

    /// Directory that holds checkpoint files.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Directory that holds audit logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.audit_dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_local_dir().join("audit"))
                .unwrap_or_else(|| std::env::temp_dir().join("pdfsmith_audit"))
        })
    }

    /// Directory in which intermediate artifacts are created.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "pdfsmith", "pdfsmith")
}
