//! Process-wide application context.
//!
//! Holds the state shared by every job of a process: the temp artifact
//! registry, the cancellation flag and the page count cache. One context is
//! built per process and handed to whatever needs it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::audit::AuditLog;
use crate::cancel::CancelToken;
use crate::checkpoint::{CheckpointStore, RecoveredJob};
use crate::config::Settings;
use crate::engine::{DocumentEngine, LopdfEngine};
use crate::error::Result;
use crate::gateway::ProcessGateway;
use crate::pipeline::{JobPipeline, PipelineEvent};
use crate::rasterizer::{Ghostscript, Rasterizer};
use crate::resilience::{HealthProbe, SystemHealth};
use crate::tracker::{SweepReport, TempTracker};
use crate::validation::{SecurityValidator, Verdict};

/// Shared state for one running process.
pub struct AppContext {
    settings: Settings,
    tracker: TempTracker,
    cancel: CancelToken,
    checkpoints: CheckpointStore,
    audit: AuditLog,
    page_counts: Mutex<HashMap<PathBuf, usize>>,
    engine: Arc<dyn DocumentEngine>,
    rasterizer: Arc<dyn Rasterizer>,
    health: Arc<dyn HealthProbe>,
}

impl AppContext {
    /// Context with the production engine, Ghostscript and system probe.
    pub fn new(settings: Settings) -> Result<Self> {
        let gateway = ProcessGateway::new(settings.limits.kill_timeout());
        let rasterizer = Ghostscript::discover(
            settings.ghostscript_override(),
            gateway,
            settings.limits.tool_timeout(),
        );
        Self::with_components(
            settings,
            Arc::new(LopdfEngine::new()),
            Arc::new(rasterizer),
            Arc::new(SystemHealth::new()),
        )
    }

    /// Context with explicit collaborators.
    pub fn with_components(
        settings: Settings,
        engine: Arc<dyn DocumentEngine>,
        rasterizer: Arc<dyn Rasterizer>,
        health: Arc<dyn HealthProbe>,
    ) -> Result<Self> {
        settings.validate()?;

        let temp_dir = settings.temp_dir();
        fs::create_dir_all(&temp_dir)?;

        let pid = std::process::id();
        let checkpoints = CheckpointStore::new(
            settings.checkpoint_dir(),
            pid,
            settings.limits.checkpoint_max_age(),
        );
        let audit = AuditLog::new(settings.audit_dir(), pid, Utc::now());
        debug!(session = audit.session(), temp_dir = %temp_dir.display(), "context ready");

        Ok(Self {
            tracker: TempTracker::new(temp_dir),
            cancel: CancelToken::new(),
            page_counts: Mutex::new(HashMap::new()),
            settings,
            checkpoints,
            audit,
            engine,
            rasterizer,
            health,
        })
    }

    /// Loaded settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Temp artifact registry.
    pub fn tracker(&self) -> &TempTracker {
        &self.tracker
    }

    /// Cancellation flag shared with the running job.
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Checkpoint store of this process.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// PDF engine.
    pub fn engine(&self) -> &Arc<dyn DocumentEngine> {
        &self.engine
    }

    /// External rasterizer.
    pub fn rasterizer(&self) -> &Arc<dyn Rasterizer> {
        &self.rasterizer
    }

    /// A validator configured with this context's limits.
    pub fn validator(&self) -> SecurityValidator {
        SecurityValidator::new(self.settings.limits.clone(), Arc::clone(&self.engine))
    }

    /// Validate `path` and remember its page count.
    pub fn admit(&self, path: &Path) -> Result<Verdict> {
        let verdict = self.validator().validate(path)?;
        self.lock_cache()
            .insert(verdict.path.clone(), verdict.page_count);
        Ok(verdict)
    }

    /// Page count recorded for `path` by an earlier admission.
    pub fn cached_page_count(&self, path: &Path) -> Option<usize> {
        self.lock_cache().get(path).copied()
    }

    /// Drop the cached page count of `path`.
    pub fn forget(&self, path: &Path) {
        self.lock_cache().remove(path);
    }

    /// A pipeline wired to this context, publishing on `events` if given.
    pub fn pipeline(&self, events: Option<UnboundedSender<PipelineEvent>>) -> JobPipeline {
        let pipeline = JobPipeline::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.rasterizer),
            self.tracker.clone(),
            self.checkpoints.clone(),
            self.audit.clone(),
            self.settings.limits.clone(),
        )
        .with_health(Arc::clone(&self.health));

        match events {
            Some(events) => pipeline.with_events(events),
            None => pipeline,
        }
    }

    /// Checkpoints left behind by earlier processes.
    pub fn scan_recovery(&self) -> Vec<RecoveredJob> {
        self.checkpoints.scan(Utc::now())
    }

    /// Final cleanup: delete every tracked artifact and this process's
    /// checkpoint.
    pub fn shutdown(&self) -> SweepReport {
        let report = self.tracker.sweep();
        self.checkpoints.clear();
        info!(
            removed = report.removed,
            failed = report.failed.len(),
            "shutdown cleanup finished"
        );
        report
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, usize>> {
        self.page_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
