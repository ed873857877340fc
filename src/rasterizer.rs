//! External rasterizer capability.
//!
//! Compression and PDF/A conversion are delegated to Ghostscript through the
//! [`ProcessGateway`]. The pipeline only sees the [`Rasterizer`] trait so the
//! tool can be swapped out, or faked in tests.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CompressionLevel;
use crate::error::{PdfSmithError, Result};
use crate::gateway::ProcessGateway;

const TOOL_NAME: &str = "Ghostscript";

/// Executable names tried on the search path, in order.
const EXECUTABLES: [&str; 3] = ["gswin64c", "gswin32c", "gs"];

/// Windows install roots searched when nothing is on the path.
const WINDOWS_ROOTS: [&str; 3] = [
    r"C:\Program Files\gs",
    r"C:\Program Files (x86)\gs",
    r"C:\Ghostscript",
];

/// Shared-data roots searched for the ICC profile on Unix installs.
const UNIX_SHARE_ROOTS: [&str; 2] = ["/usr/share/ghostscript", "/usr/local/share/ghostscript"];

const ICC_NAMES: [&str; 2] = ["srgb.icc", "default_rgb.icc"];

/// Recompression and archival conversion of whole PDF files.
pub trait Rasterizer: Send + Sync {
    /// Whether compression can run.
    fn is_available(&self) -> bool;

    /// Whether PDF/A conversion can run.
    fn pdfa_available(&self) -> bool;

    /// Recompress `input` into `output`.
    fn compress<'a>(
        &'a self,
        input: &'a Path,
        output: &'a Path,
        level: CompressionLevel,
    ) -> BoxFuture<'a, Result<()>>;

    /// Convert `input` into a PDF/A-2B file at `output`.
    fn convert_to_pdfa<'a>(&'a self, input: &'a Path, output: &'a Path)
    -> BoxFuture<'a, Result<()>>;
}

/// Ghostscript-backed [`Rasterizer`].
#[derive(Debug, Clone)]
pub struct Ghostscript {
    executable: Option<PathBuf>,
    icc_profile: Option<PathBuf>,
    gateway: ProcessGateway,
    timeout: Duration,
}

impl Ghostscript {
    /// Locate Ghostscript and its sRGB profile.
    ///
    /// `override_path` wins when it points at an existing file.
    pub fn discover(
        override_path: Option<PathBuf>,
        gateway: ProcessGateway,
        timeout: Duration,
    ) -> Self {
        let executable = locate_executable(override_path);
        let icc_profile = executable.as_deref().and_then(locate_icc_profile);

        match (&executable, &icc_profile) {
            (Some(_), Some(_)) => info!("PDF/A available: Ghostscript and ICC profile found"),
            (Some(_), None) => warn!("PDF/A unavailable: ICC profile not found"),
            (None, _) => warn!("Ghostscript not found; compression and PDF/A disabled"),
        }

        Self {
            executable,
            icc_profile,
            gateway,
            timeout,
        }
    }

    /// Build with explicit locations, skipping discovery.
    pub fn with_paths(
        executable: Option<PathBuf>,
        icc_profile: Option<PathBuf>,
        gateway: ProcessGateway,
        timeout: Duration,
    ) -> Self {
        Self {
            executable,
            icc_profile,
            gateway,
            timeout,
        }
    }

    /// Resolved executable.
    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    /// Resolved ICC profile.
    pub fn icc_profile(&self) -> Option<&Path> {
        self.icc_profile.as_deref()
    }

    /// Version reported by `--version`.
    pub async fn version(&self) -> Option<String> {
        let executable = self.executable.as_ref()?;
        let argv = vec![executable.clone().into_os_string(), "--version".into()];
        match self.gateway.run(&argv, Duration::from_secs(10)).await {
            Ok(output) if output.success() => Some(output.stdout.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "could not query Ghostscript version");
                None
            }
        }
    }

    async fn run_checked(&self, stage: &str, argv: Vec<OsString>, output: &Path) -> Result<()> {
        let result = self.gateway.run(&argv, self.timeout).await?;
        if !result.success() {
            let detail = match result.stderr.trim() {
                "" => "unknown error".to_string(),
                stderr => stderr.to_string(),
            };
            return Err(PdfSmithError::processing(stage, detail));
        }
        match fs::metadata(output) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(PdfSmithError::processing(
                stage,
                "output file was not produced or is empty",
            )),
        }
    }

    fn base_args(&self, executable: &Path, output: &Path) -> Vec<OsString> {
        let mut output_arg = OsString::from("-sOutputFile=");
        output_arg.push(output);
        vec![
            executable.as_os_str().to_owned(),
            "-sDEVICE=pdfwrite".into(),
            "-dNOPAUSE".into(),
            "-dQUIET".into(),
            "-dBATCH".into(),
            "-dSAFER".into(),
            output_arg,
        ]
    }
}

impl Rasterizer for Ghostscript {
    fn is_available(&self) -> bool {
        self.executable.is_some()
    }

    fn pdfa_available(&self) -> bool {
        self.executable.is_some() && self.icc_profile.is_some()
    }

    fn compress<'a>(
        &'a self,
        input: &'a Path,
        output: &'a Path,
        level: CompressionLevel,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let executable = self
                .executable
                .as_deref()
                .ok_or_else(|| PdfSmithError::tool_unavailable(TOOL_NAME))?;

            let mut argv = self.base_args(executable, output);
            argv.extend([
                format!("-dPDFSETTINGS={}", level.preset()).into(),
                "-dCompatibilityLevel=1.4".into(),
                "-dDetectDuplicateImages=true".into(),
                "-dCompressFonts=true".into(),
                "-dCompressPages=true".into(),
                input.as_os_str().to_owned(),
            ]);

            info!(level = level.as_str(), "compressing with Ghostscript");
            self.run_checked("Compressing", argv, output).await?;

            let before = fs::metadata(input).map(|m| m.len()).unwrap_or(0);
            let after = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
            if before > 0 {
                let reduction = (before as f64 - after as f64) / before as f64 * 100.0;
                info!(before, after, "compression finished (-{reduction:.1}%)");
            }
            Ok(())
        })
    }

    fn convert_to_pdfa<'a>(
        &'a self,
        input: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (Some(executable), Some(icc)) =
                (self.executable.as_deref(), self.icc_profile.as_deref())
            else {
                return Err(PdfSmithError::tool_unavailable("Ghostscript with an sRGB ICC profile"));
            };

            let mut icc_arg = OsString::from("-sOutputICCProfile=");
            icc_arg.push(icc);
            let mut permit_arg = OsString::from("--permit-file-read=");
            permit_arg.push(icc);

            let mut argv = self.base_args(executable, output);
            argv.extend([
                "-dPDFA=2".into(),
                "-dPDFACompatibilityPolicy=1".into(),
                "-sColorConversionStrategy=RGB".into(),
                "-sProcessColorModel=DeviceRGB".into(),
                icc_arg,
                permit_arg,
                input.as_os_str().to_owned(),
            ]);

            info!("converting to PDF/A-2B");
            self.run_checked("PDF/A conversion", argv, output).await
        })
    }
}

fn locate_executable(override_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        if path.is_file() {
            info!(path = %path.display(), "using configured Ghostscript");
            return Some(path);
        }
        warn!(path = %path.display(), "configured Ghostscript does not exist, searching");
    }

    if let Some(path) = search_path() {
        info!(path = %path.display(), "Ghostscript found on PATH");
        return Some(path);
    }

    if cfg!(windows) {
        for root in WINDOWS_ROOTS {
            if let Some(path) = newest_install(Path::new(root)) {
                info!(path = %path.display(), "Ghostscript found in install folder");
                return Some(path);
            }
        }
    }
    None
}

fn search_path() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    let dirs: Vec<PathBuf> = std::env::split_paths(&path_var).collect();
    EXECUTABLES.iter().find_map(|name| {
        let file = format!("{name}{}", std::env::consts::EXE_SUFFIX);
        dirs.iter().map(|dir| dir.join(&file)).find(|p| p.is_file())
    })
}

/// Highest-versioned `gs*/bin/gswin{64,32}c.exe` under `root`.
fn newest_install(root: &Path) -> Option<PathBuf> {
    if !root.is_dir() {
        return None;
    }
    ["gswin64c.exe", "gswin32c.exe"].iter().find_map(|exe| {
        let root = glob::Pattern::escape(&root.to_string_lossy());
        let pattern = Path::new(&root).join("gs*").join("bin").join(exe);
        let mut found: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .ok()?
            .filter_map(std::result::Result::ok)
            .collect();
        found.sort();
        found.pop()
    })
}

/// Find an sRGB profile shipped with the Ghostscript at `executable`.
pub fn locate_icc_profile(executable: &Path) -> Option<PathBuf> {
    let install_root = executable.parent().and_then(Path::parent)?;

    let candidates = [
        install_root.join("iccprofiles").join("srgb.icc"),
        install_root.join("iccprofiles").join("default_rgb.icc"),
        install_root.join("lib").join("srgb.icc"),
        install_root
            .join("Resource")
            .join("ColorSpace")
            .join("sRGB.icc"),
    ];
    if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
        info!(path = %found.display(), "ICC profile found");
        return Some(found);
    }

    let mut roots = vec![install_root.to_path_buf()];
    if !cfg!(windows) {
        roots.extend(UNIX_SHARE_ROOTS.iter().map(PathBuf::from));
    }
    let found = roots.iter().filter(|r| r.is_dir()).find_map(|root| {
        WalkDir::new(root)
            .max_depth(5)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .find(|entry| {
                entry.file_type().is_file()
                    && ICC_NAMES.contains(&entry.file_name().to_string_lossy().to_lowercase().as_str())
            })
            .map(walkdir::DirEntry::into_path)
    });

    match &found {
        Some(path) => info!(path = %path.display(), "ICC profile found by search"),
        None => warn!("ICC profile not found"),
    }
    found
}
