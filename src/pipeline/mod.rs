//! Job pipeline controller.
//!
//! A job moves through these states:
//!
//! ```text
//! Admitted -> Validating -> Merging | Splitting
//!          -> ConvertingPdfA? -> Protecting? -> Compressing?
//!          -> FinalValidating -> Committing -> Done
//! ```
//!
//! `Cancelled` and `Failed` can be reached from any non-terminal state. The
//! enhancement stages (PDF/A, protection, compression) never fail a job;
//! they log a warning and the chain continues with the artifact it had.
//! Split jobs run every part through the enhancement stages and commit it
//! before starting the next, so committed parts survive a later
//! cancellation.
//!
//! The pipeline knows nothing about any user interface. Progress is
//! published as [`PipelineEvent`]s on an optional channel.

mod chain;
mod plan;
mod state;

pub use chain::ArtifactChain;
pub use plan::{PlannedPart, plan_parts};
pub use state::{JobReport, JobState, PipelineEvent};

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use lopdf::Document;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::cancel::CancelToken;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{CompressionLevel, Limits};
use crate::engine::DocumentEngine;
use crate::error::{PdfSmithError, Result};
use crate::job::{JobKind, JobOptions, JobRequest, NoAnswer, Password};
use crate::naming;
use crate::rasterizer::Rasterizer;
use crate::resilience::{HealthProbe, NoHealthCheck, RetryPolicy, with_fallback};
use crate::tracker::TempTracker;
use crate::validation::{PDF_SIGNATURE, PageBudget, SecurityValidator, Verdict};

const FINAL_VALIDATION: &str = "Final validation";
const ENCRYPT_MARKER: &[u8] = b"/Encrypt";

/// Mutable state of the job being run.
struct JobRun {
    kind: JobKind,
    state: JobState,
    warnings: Vec<String>,
    outputs: Vec<PathBuf>,
    skipped: Vec<(PathBuf, String)>,
    checkpoint: Checkpoint,
}

impl JobRun {
    fn new(kind: JobKind) -> Self {
        Self {
            kind,
            state: JobState::Admitted,
            warnings: Vec::new(),
            outputs: Vec::new(),
            skipped: Vec::new(),
            checkpoint: Checkpoint::new(kind, JobState::Admitted.label()),
        }
    }

    fn into_report(self) -> JobReport {
        JobReport {
            kind: self.kind,
            outputs: self.outputs,
            warnings: self.warnings,
            skipped: self.skipped,
            state: self.state,
        }
    }
}

/// Runs one job at a time through the stage chain.
pub struct JobPipeline {
    engine: Arc<dyn DocumentEngine>,
    rasterizer: Arc<dyn Rasterizer>,
    tracker: TempTracker,
    checkpoints: CheckpointStore,
    audit: AuditLog,
    limits: Limits,
    retry: RetryPolicy,
    health: Arc<dyn HealthProbe>,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl JobPipeline {
    /// Pipeline with retry settings taken from `limits` and no health probe.
    pub fn new(
        engine: Arc<dyn DocumentEngine>,
        rasterizer: Arc<dyn Rasterizer>,
        tracker: TempTracker,
        checkpoints: CheckpointStore,
        audit: AuditLog,
        limits: Limits,
    ) -> Self {
        Self {
            retry: RetryPolicy::from_limits(&limits),
            engine,
            rasterizer,
            tracker,
            checkpoints,
            audit,
            limits,
            health: Arc::new(NoHealthCheck),
            events: None,
        }
    }

    /// Replace the retry policy used for the core write.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Consult `probe` before every core write attempt.
    pub fn with_health(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health = probe;
        self
    }

    /// Publish progress on `events`.
    pub fn with_events(mut self, events: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run `request` to completion.
    ///
    /// Cancellation is not an error: the report comes back with state
    /// `Cancelled` and lists whatever outputs were already committed. Every
    /// temp artifact created by the job is gone when this returns, except
    /// the ones committed as outputs.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the job to `Failed`.
    pub async fn run(&self, mut request: JobRequest, cancel: &CancelToken) -> Result<JobReport> {
        let mut job = JobRun::new(request.kind);
        info!(kind = %request.kind, files = request.inputs.len(), "job admitted");
        self.audit.record(
            request.kind,
            AuditEvent::Start,
            &request.inputs,
            &request.options.summary(),
        );
        self.emit(PipelineEvent::StateChanged(JobState::Admitted));
        self.save_checkpoint(&mut job);

        let outcome = self.execute(&mut request, cancel, &mut job).await;
        self.checkpoints.clear();
        let summary = request.options.summary();

        match outcome {
            Ok(()) => {
                info!(kind = %request.kind, outputs = job.outputs.len(), "job finished");
                self.finish(&mut job, JobState::Done);
                self.audit
                    .record(request.kind, AuditEvent::Success, &request.inputs, &summary);
                Ok(job.into_report())
            }
            Err(PdfSmithError::Cancelled) => {
                info!(kind = %request.kind, outputs = job.outputs.len(), "job cancelled");
                self.finish(&mut job, JobState::Cancelled);
                self.audit
                    .record(request.kind, AuditEvent::Cancelled, &request.inputs, &summary);
                Ok(job.into_report())
            }
            Err(e) => {
                error!(kind = %request.kind, state = %job.state, error = %e, "job failed");
                self.finish(&mut job, JobState::Failed);
                self.audit
                    .record(request.kind, AuditEvent::Error, &request.inputs, &summary);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: &mut JobRequest,
        cancel: &CancelToken,
        job: &mut JobRun,
    ) -> Result<()> {
        self.enter(job, JobState::Validating);
        request.validate(&self.limits)?;

        if request.options.has_conflict() {
            request.options = std::mem::take(&mut request.options).resolve_conflicts(&NoAnswer);
            self.warn(
                job,
                "PDF/A and password protection cannot be combined; PDF/A was disabled",
            );
        }
        for warning in request.options.warnings() {
            self.warn(job, warning);
        }

        let admitted = self.admit(request, job)?;
        cancel.check()?;

        fs::create_dir_all(&request.output_folder)?;
        let stamp = naming::timestamp(Local::now());

        match request.kind {
            JobKind::Merge => self.merge(request, &admitted, &stamp, cancel, job).await,
            JobKind::Split => self.split(request, &admitted, &stamp, cancel, job).await,
        }
    }

    /// Validate every input and enforce the cumulative page ceiling.
    ///
    /// A rejected file fails a merge outright. A split skips it.
    fn admit(&self, request: &JobRequest, job: &mut JobRun) -> Result<Vec<Verdict>> {
        let validator = SecurityValidator::new(self.limits.clone(), Arc::clone(&self.engine));
        let mut budget = PageBudget::new(self.limits.max_total_pages);
        let mut admitted = Vec::with_capacity(request.inputs.len());
        let mut first_rejection = None;

        for input in &request.inputs {
            match validator.validate(input) {
                Ok(verdict) => {
                    budget.charge(verdict.page_count)?;
                    admitted.push(verdict);
                }
                Err(e) if request.kind == JobKind::Merge => return Err(e),
                Err(e) => {
                    self.warn(job, format!("Skipping {}: {e}", display_name(input)));
                    job.skipped.push((input.clone(), e.to_string()));
                    first_rejection.get_or_insert(e);
                }
            }
        }

        if admitted.is_empty() {
            return Err(first_rejection
                .unwrap_or_else(|| PdfSmithError::invalid_config("No valid input files")));
        }

        debug!(files = admitted.len(), pages = budget.used(), "inputs admitted");
        Ok(admitted)
    }

    async fn merge(
        &self,
        request: &JobRequest,
        admitted: &[Verdict],
        stamp: &str,
        cancel: &CancelToken,
        job: &mut JobRun,
    ) -> Result<()> {
        self.enter(job, JobState::Merging);
        let total = admitted.len();
        let mut merged: Option<Document> = None;

        for (index, verdict) in admitted.iter().enumerate() {
            cancel.check()?;
            let document = self.engine.load(&verdict.path)?;
            match merged.as_mut() {
                Some(target) => self.engine.append(target, document)?,
                None => merged = Some(document),
            }

            job.checkpoint.files_processed.push(verdict.path.clone());
            self.save_checkpoint(job);
            self.emit(PipelineEvent::Progress {
                current: index + 1,
                total,
                message: format!("Added {}", display_name(&verdict.path)),
            });
        }

        let mut document =
            merged.ok_or_else(|| PdfSmithError::processing("Merging", "no documents to merge"))?;
        cancel.check()?;
        if request.options.strip_metadata {
            self.engine.strip_metadata(&mut document)?;
        }

        let name = request
            .output_name
            .clone()
            .unwrap_or_else(|| naming::merge_name(&request.inputs, stamp));

        let mut chain = ArtifactChain::new(self.tracker.clone());
        self.write_core(&mut chain, document, "merged").await?;
        let output = self
            .finish_output(
                chain,
                &request.options,
                &request.output_folder,
                &name,
                cancel,
                job,
            )
            .await?;

        info!(path = %output.display(), "merged document written");
        job.outputs.push(output);
        Ok(())
    }

    async fn split(
        &self,
        request: &JobRequest,
        admitted: &[Verdict],
        stamp: &str,
        cancel: &CancelToken,
        job: &mut JobRun,
    ) -> Result<()> {
        let mode = request
            .split_mode
            .clone()
            .ok_or_else(|| PdfSmithError::invalid_config("Split job has no split mode"))?;
        let mut first_failure = None;

        for verdict in admitted {
            self.enter(job, JobState::Splitting);
            cancel.check()?;

            let document = self.engine.load(&verdict.path)?;
            let page_count = u32::try_from(self.engine.page_count(&document)).unwrap_or(u32::MAX);
            let parts = match plan_parts(
                &mode,
                &verdict.path,
                page_count,
                request.output_name.as_deref(),
                stamp,
                self.limits.max_total_pages,
            ) {
                Ok(parts) => parts,
                Err(e) => {
                    self.warn(job, format!("Skipping {}: {e}", display_name(&verdict.path)));
                    job.skipped.push((verdict.path.clone(), e.to_string()));
                    first_failure.get_or_insert(e);
                    continue;
                }
            };

            let total = parts.len();
            for (index, part) in parts.iter().enumerate() {
                self.enter(job, JobState::Splitting);
                cancel.check()?;

                let output = self
                    .write_part(&document, part, &request.options, &request.output_folder, cancel, job)
                    .await?;
                self.emit(PipelineEvent::Progress {
                    current: index + 1,
                    total,
                    message: format!("Wrote {}", display_name(&output)),
                });
                job.outputs.push(output);
            }

            job.checkpoint.files_processed.push(verdict.path.clone());
            self.save_checkpoint(job);
        }

        match first_failure {
            Some(e) if job.outputs.is_empty() => Err(e),
            _ => Ok(()),
        }
    }

    async fn write_part(
        &self,
        source: &Document,
        part: &PlannedPart,
        options: &JobOptions,
        folder: &Path,
        cancel: &CancelToken,
        job: &mut JobRun,
    ) -> Result<PathBuf> {
        let mut document = self.engine.select_pages(source, &part.pages)?;
        if options.strip_metadata {
            self.engine.strip_metadata(&mut document)?;
        }

        let mut chain = ArtifactChain::new(self.tracker.clone());
        self.write_core(&mut chain, document, "part").await?;
        self.finish_output(chain, options, folder, &part.name, cancel, job)
            .await
    }

    /// Write the core transform result as the chain's first artifact.
    ///
    /// Object-stream compression is tried first; a plain write is the
    /// fallback once retries run out.
    async fn write_core(
        &self,
        chain: &mut ArtifactChain,
        document: Document,
        label: &str,
    ) -> Result<()> {
        let path = chain.stage_output(label)?;
        let document = Mutex::new(document);
        let write = |compress: bool| {
            let result = match document.lock() {
                Ok(mut document) => self.engine.save(&mut document, &path, compress),
                Err(_) => Err(PdfSmithError::other("document lock poisoned")),
            };
            std::future::ready(result)
        };

        with_fallback(
            &self.retry,
            self.health.as_ref(),
            || write(true),
            Some(|| write(false)),
        )
        .await?;
        chain.promote()?;
        Ok(())
    }

    /// Run the enhancement stages, validate and commit.
    async fn finish_output(
        &self,
        mut chain: ArtifactChain,
        options: &JobOptions,
        folder: &Path,
        name: &str,
        cancel: &CancelToken,
        job: &mut JobRun,
    ) -> Result<PathBuf> {
        if options.apply_pdfa {
            cancel.check()?;
            self.convert_pdfa(&mut chain, job).await;
        }

        let mut protected = false;
        if let Some(password) = &options.protect {
            if options.apply_pdfa {
                debug!("protection not applied to a PDF/A document");
            } else {
                cancel.check()?;
                protected = self.protect(&mut chain, password, job);
            }
        }

        if let Some(level) = options.compress {
            cancel.check()?;
            self.compress(&mut chain, level, protected, job).await;
        }

        cancel.check()?;
        self.enter(job, JobState::FinalValidating);
        self.validate_final(&mut chain, protected, job)?;

        self.enter(job, JobState::Committing);
        let destination = naming::unique_path(folder, name, self.limits.max_name_collisions);
        chain.commit(&destination)
    }

    async fn convert_pdfa(&self, chain: &mut ArtifactChain, job: &mut JobRun) {
        if !self.rasterizer.pdfa_available() {
            self.warn(
                job,
                "PDF/A conversion is unavailable (Ghostscript or its ICC profile is missing)",
            );
            return;
        }
        let Some(input) = chain.current().map(Path::to_path_buf) else {
            return;
        };

        self.enter(job, JobState::ConvertingPdfA);
        let outcome = match chain.stage_output("pdfa") {
            Ok(output) => self.rasterizer.convert_to_pdfa(&input, &output).await,
            Err(e) => Err(e),
        };
        self.settle(chain, job, "PDF/A conversion", outcome);
    }

    fn protect(&self, chain: &mut ArtifactChain, password: &Password, job: &mut JobRun) -> bool {
        let Some(input) = chain.current().map(Path::to_path_buf) else {
            return false;
        };

        self.enter(job, JobState::Protecting);
        let outcome = chain.stage_output("protected").and_then(|output| {
            let mut document = self.engine.load(&input)?;
            self.engine.encrypt(&mut document, password)?;
            self.engine.save(&mut document, &output, false)
        });
        self.settle(chain, job, "Password protection", outcome)
    }

    async fn compress(
        &self,
        chain: &mut ArtifactChain,
        level: CompressionLevel,
        protected: bool,
        job: &mut JobRun,
    ) {
        if !self.rasterizer.is_available() {
            self.warn(job, "Compression is unavailable (Ghostscript not found)");
            return;
        }
        if protected {
            self.warn(
                job,
                "Compression skipped: a password-protected document cannot be recompressed",
            );
            return;
        }
        let Some(input) = chain.current().map(Path::to_path_buf) else {
            return;
        };

        self.enter(job, JobState::Compressing);
        let outcome = match chain.stage_output("compressed") {
            Ok(output) => self.rasterizer.compress(&input, &output, level).await,
            Err(e) => Err(e),
        };
        self.settle(chain, job, "Compression", outcome);
    }

    /// Accept or drop the output of an enhancement stage.
    fn settle(
        &self,
        chain: &mut ArtifactChain,
        job: &mut JobRun,
        stage: &str,
        outcome: Result<()>,
    ) -> bool {
        match outcome.and_then(|()| chain.promote().map(|_| ())) {
            Ok(()) => true,
            Err(e) => {
                chain.reject();
                self.warn(job, format!("{stage} failed, continuing without it: {e}"));
                false
            }
        }
    }

    /// Check the chain's current artifact, reverting once to the fallback.
    fn validate_final(
        &self,
        chain: &mut ArtifactChain,
        protected: bool,
        job: &mut JobRun,
    ) -> Result<()> {
        let current = chain
            .current()
            .map(Path::to_path_buf)
            .ok_or_else(|| PdfSmithError::processing(FINAL_VALIDATION, "no output produced"))?;

        let Err(first) = self.verify_output(&current, protected) else {
            return Ok(());
        };

        if !chain.has_fallback() {
            return Err(first);
        }
        self.warn(
            job,
            format!(
                "Final output failed validation ({first}); using the document from before PDF/A, protection and compression"
            ),
        );
        let fallback = chain.revert().map(Path::to_path_buf).ok_or(first)?;
        self.verify_output(&fallback, false)
    }

    fn verify_output(&self, path: &Path, encrypted: bool) -> Result<()> {
        let size = fs::metadata(path)
            .map_err(|e| PdfSmithError::processing(FINAL_VALIDATION, format!("output missing: {e}")))?
            .len();
        if size < self.limits.min_output_size {
            return Err(PdfSmithError::processing(
                FINAL_VALIDATION,
                format!("output is only {size} bytes"),
            ));
        }

        let mut signature = [0u8; 4];
        File::open(path)
            .and_then(|mut file| file.read_exact(&mut signature))
            .map_err(|e| PdfSmithError::processing(FINAL_VALIDATION, e.to_string()))?;
        if &signature != PDF_SIGNATURE {
            return Err(PdfSmithError::processing(
                FINAL_VALIDATION,
                "output does not start with the PDF signature",
            ));
        }

        match self.engine.load(path) {
            Ok(document) if self.engine.page_count(&document) > 0 => Ok(()),
            Ok(_) => Err(PdfSmithError::processing(FINAL_VALIDATION, "output has no pages")),
            // Without the password the page tree may be unreadable.
            Err(e) if encrypted && has_marker(path, ENCRYPT_MARKER) => {
                debug!(error = %e, "encrypted output accepted on its encryption dictionary");
                Ok(())
            }
            Err(e) => Err(PdfSmithError::processing(FINAL_VALIDATION, e.to_string())),
        }
    }

    fn enter(&self, job: &mut JobRun, state: JobState) {
        if job.state == state {
            return;
        }
        job.state = state;
        debug!(state = %state, "pipeline state changed");
        self.emit(PipelineEvent::StateChanged(state));
        job.checkpoint.stage = state.label().to_string();
        self.save_checkpoint(job);
    }

    fn finish(&self, job: &mut JobRun, state: JobState) {
        job.state = state;
        self.emit(PipelineEvent::Finished(state));
    }

    fn warn(&self, job: &mut JobRun, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.emit(PipelineEvent::Warning(message.clone()));
        job.warnings.push(message);
    }

    fn save_checkpoint(&self, job: &mut JobRun) {
        let mut live: Vec<PathBuf> = self.tracker.list_all().into_iter().collect();
        live.sort();
        job.checkpoint.temp_files = live;
        job.checkpoint.timestamp = Utc::now();
        if let Err(e) = self.checkpoints.save(&job.checkpoint) {
            warn!(error = %e, "could not write checkpoint");
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // A subscriber that went away does not stop the job.
            let _ = events.send(event);
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn has_marker(path: &Path, marker: &[u8]) -> bool {
    fs::read(path)
        .map(|bytes| bytes.windows(marker.len()).any(|window| window == marker))
        .unwrap_or(false)
}
