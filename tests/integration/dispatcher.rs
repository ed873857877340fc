//! Integration tests for the command dispatcher and the job worker.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lopdf::Document;
use pdfsmith::commands::{CommandOutcome, Dispatcher, JobSubmission, UiCommand};
use pdfsmith::context::AppContext;
use pdfsmith::engine::{DocumentEngine, LopdfEngine};
use pdfsmith::job::{ConflictChoice, JobKind, JobOptions, JobRequest, NoAnswer, Password, SplitMode};
use pdfsmith::resilience::NoHealthCheck;
use pdfsmith::worker::JobWorker;
use pdfsmith::{JobState, PdfSmithError, Result};

use crate::common::{CopyingRasterizer, MissingRasterizer, Workspace, is_encrypted};

fn context(ws: &Workspace, engine: Arc<dyn DocumentEngine>) -> Arc<AppContext> {
    Arc::new(
        AppContext::with_components(
            ws.settings(),
            engine,
            Arc::new(MissingRasterizer),
            Arc::new(NoHealthCheck),
        )
        .unwrap(),
    )
}

fn dispatcher(ws: &Workspace) -> Dispatcher {
    let context = context(ws, Arc::new(LopdfEngine::new()));
    let worker = JobWorker::spawn(Arc::clone(&context), None).unwrap();
    Dispatcher::new(context, worker, Box::new(NoAnswer))
}

fn submission(kind: JobKind, ws: &Workspace) -> JobSubmission {
    JobSubmission {
        kind,
        split_mode: None,
        options: JobOptions::default(),
        output_folder: ws.output_dir(),
        output_name: None,
    }
}

#[test]
fn test_add_files_reports_duplicates_and_rejections() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 2);
    let fake = ws.raw_input("fake.pdf", b"not a pdf");
    let mut dispatcher = dispatcher(&ws);

    let outcome = dispatcher
        .dispatch(UiCommand::AddFiles {
            tab: JobKind::Merge,
            paths: vec![a.clone(), a.clone(), fake.clone()],
        })
        .unwrap();

    let CommandOutcome::FilesAdded {
        added,
        duplicates,
        rejected,
    } = outcome
    else {
        panic!("unexpected outcome");
    };
    assert_eq!(added, vec![a]);
    assert_eq!(duplicates, 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].0, fake);
    assert!(matches!(rejected[0].1, PdfSmithError::Security { .. }));

    assert_eq!(dispatcher.working_set(JobKind::Merge).len(), 1);
    assert_eq!(dispatcher.working_set(JobKind::Merge).total_pages(), 2);
    assert!(dispatcher.working_set(JobKind::Split).is_empty());
}

#[test]
fn test_reorder_and_sort() {
    let ws = Workspace::new();
    let paths = vec![
        ws.input("Charlie.pdf", 1),
        ws.input("alpha.pdf", 1),
        ws.input("bravo.pdf", 1),
    ];
    let mut dispatcher = dispatcher(&ws);
    dispatcher
        .dispatch(UiCommand::AddFiles {
            tab: JobKind::Merge,
            paths: paths.clone(),
        })
        .unwrap();

    let outcome = dispatcher
        .dispatch(UiCommand::MoveFile {
            tab: JobKind::Merge,
            from: 2,
            to: 0,
        })
        .unwrap();
    assert!(matches!(outcome, CommandOutcome::WorkingSetChanged));
    assert_eq!(
        dispatcher.working_set(JobKind::Merge).paths(),
        vec![paths[2].clone(), paths[0].clone(), paths[1].clone()]
    );

    dispatcher
        .dispatch(UiCommand::SortByName { tab: JobKind::Merge })
        .unwrap();
    assert_eq!(
        dispatcher.working_set(JobKind::Merge).paths(),
        vec![paths[1].clone(), paths[2].clone(), paths[0].clone()]
    );

    let outcome = dispatcher
        .dispatch(UiCommand::RemoveFile {
            tab: JobKind::Merge,
            index: 9,
        })
        .unwrap();
    assert!(matches!(outcome, CommandOutcome::Unchanged));
}

#[test]
fn test_submit_merge_through_worker() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let b = ws.input("b.pdf", 2);
    let mut dispatcher = dispatcher(&ws);
    dispatcher
        .dispatch(UiCommand::AddFiles {
            tab: JobKind::Merge,
            paths: vec![a, b],
        })
        .unwrap();

    let CommandOutcome::Submitted(handle) = dispatcher
        .dispatch(UiCommand::Submit(submission(JobKind::Merge, &ws)))
        .unwrap()
    else {
        panic!("job not submitted");
    };
    let report = handle.wait_blocking().unwrap();
    assert_eq!(report.state, JobState::Done);
    assert_eq!(ws.outputs(), report.outputs);

    let CommandOutcome::ShutDown(sweep) = dispatcher.dispatch(UiCommand::Shutdown).unwrap() else {
        panic!("unexpected outcome");
    };
    assert!(sweep.failed.is_empty());
    assert!(ws.temp_files().is_empty());
}

#[test]
fn test_submit_with_empty_working_set_fails() {
    let ws = Workspace::new();
    let mut dispatcher = dispatcher(&ws);

    let mut split = submission(JobKind::Split, &ws);
    split.split_mode = Some(SplitMode::AllPages);
    let err = dispatcher.dispatch(UiCommand::Submit(split)).unwrap_err();
    assert!(matches!(err, PdfSmithError::InvalidConfig { .. }));
    assert!(!dispatcher.is_busy());
}

#[test]
fn test_resolver_answer_is_applied() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let context = context(&ws, Arc::new(LopdfEngine::new()));
    let worker = JobWorker::spawn(Arc::clone(&context), None).unwrap();
    let mut dispatcher =
        Dispatcher::new(context, worker, Box::new(ConflictChoice::KeepProtection));
    dispatcher
        .dispatch(UiCommand::AddFiles {
            tab: JobKind::Merge,
            paths: vec![a],
        })
        .unwrap();

    let mut job = submission(JobKind::Merge, &ws);
    job.options = JobOptions {
        apply_pdfa: true,
        protect: Some(Password::new("a long passphrase").unwrap()),
        ..Default::default()
    };
    let CommandOutcome::Submitted(handle) =
        dispatcher.dispatch(UiCommand::Submit(job)).unwrap()
    else {
        panic!("job not submitted");
    };
    let report = handle.wait_blocking().unwrap();

    assert!(is_encrypted(&report.outputs[0]));
    // The operator answered, so the pipeline has nothing to warn about.
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

/// Engine whose loads announce themselves and then block until the test
/// lets them through.
struct GatedEngine {
    inner: LopdfEngine,
    gate: Mutex<Receiver<()>>,
    entered: Mutex<Sender<()>>,
}

impl GatedEngine {
    /// The engine, the sender that releases loads and the receiver that
    /// hears about them.
    fn new() -> (Self, Sender<()>, Receiver<()>) {
        let (open, gate) = mpsc::channel();
        let (entered, announcements) = mpsc::channel();
        let engine = Self {
            inner: LopdfEngine::new(),
            gate: Mutex::new(gate),
            entered: Mutex::new(entered),
        };
        (engine, open, announcements)
    }
}

impl DocumentEngine for GatedEngine {
    fn load(&self, path: &Path) -> Result<Document> {
        if let Ok(entered) = self.entered.lock() {
            let _ = entered.send(());
        }
        if let Ok(gate) = self.gate.lock() {
            // Returns once a token arrives or the sender is dropped.
            let _ = gate.recv();
        }
        self.inner.load(path)
    }

    fn append(&self, target: &mut Document, source: Document) -> Result<()> {
        self.inner.append(target, source)
    }

    fn select_pages(&self, doc: &Document, pages: &[u32]) -> Result<Document> {
        self.inner.select_pages(doc, pages)
    }

    fn strip_metadata(&self, doc: &mut Document) -> Result<()> {
        self.inner.strip_metadata(doc)
    }

    fn encrypt(&self, doc: &mut Document, password: &Password) -> Result<()> {
        self.inner.encrypt(doc, password)
    }

    fn save(&self, doc: &mut Document, path: &Path, compress: bool) -> Result<()> {
        self.inner.save(doc, path, compress)
    }
}

#[test]
fn test_worker_runs_one_job_at_a_time() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let (engine, open, _entered) = GatedEngine::new();
    let context = context(&ws, Arc::new(engine));
    let worker = JobWorker::spawn(context, None).unwrap();

    let first = worker
        .submit(JobRequest::merge(vec![a.clone()], ws.output_dir()))
        .unwrap();
    assert!(worker.is_busy());

    let err = worker
        .submit(JobRequest::merge(vec![a], ws.output_dir()))
        .unwrap_err();
    assert!(matches!(err, PdfSmithError::Overload { .. }));

    drop(open);
    let report = first.wait_blocking().unwrap();
    assert_eq!(report.state, JobState::Done);
    assert_eq!(ws.outputs().len(), 1);
}

#[test]
fn test_cancel_through_dispatcher() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let b = ws.input("b.pdf", 1);
    let (engine, open, entered) = GatedEngine::new();
    let context = context(&ws, Arc::new(engine));
    let worker = JobWorker::spawn(Arc::clone(&context), None).unwrap();
    let mut dispatcher = Dispatcher::new(context, worker, Box::new(NoAnswer));

    // Let the two admission loads through.
    open.send(()).unwrap();
    open.send(()).unwrap();
    dispatcher
        .dispatch(UiCommand::AddFiles {
            tab: JobKind::Merge,
            paths: vec![a, b],
        })
        .unwrap();
    while entered.try_recv().is_ok() {}

    let CommandOutcome::Submitted(handle) = dispatcher
        .dispatch(UiCommand::Submit(submission(JobKind::Merge, &ws)))
        .unwrap()
    else {
        panic!("job not submitted");
    };
    // The worker is now inside the job.
    entered.recv().unwrap();
    let outcome = dispatcher.dispatch(UiCommand::Cancel).unwrap();
    assert!(matches!(outcome, CommandOutcome::CancelRequested));
    drop(open);

    let report = handle.wait_blocking().unwrap();
    assert!(report.is_cancelled());
    assert!(ws.outputs().is_empty());
    assert!(ws.temp_files().is_empty());
}

#[test]
fn test_recovery_scan_and_discard() {
    let ws = Workspace::new();
    let stale = pdfsmith::checkpoint::CheckpointStore::new(
        ws.path("checkpoints"),
        u32::MAX - 7,
        std::time::Duration::from_secs(3600),
    );
    stale
        .save(&pdfsmith::checkpoint::Checkpoint::new(JobKind::Merge, "Merging"))
        .unwrap();
    let mut dispatcher = dispatcher(&ws);

    let CommandOutcome::Recovery(jobs) = dispatcher.dispatch(UiCommand::ScanRecovery).unwrap()
    else {
        panic!("unexpected outcome");
    };
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].checkpoint.stage, "Merging");

    let CommandOutcome::RecoveryDiscarded(count) =
        dispatcher.dispatch(UiCommand::DiscardRecovery).unwrap()
    else {
        panic!("unexpected outcome");
    };
    assert_eq!(count, 1);
    assert!(!stale.path().exists());
}

#[test]
fn test_copying_rasterizer_is_used_for_pdfa() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let rasterizer = Arc::new(CopyingRasterizer::default());
    let context = Arc::new(
        AppContext::with_components(
            ws.settings(),
            Arc::new(LopdfEngine::new()),
            rasterizer.clone(),
            Arc::new(NoHealthCheck),
        )
        .unwrap(),
    );
    let worker = JobWorker::spawn(context, None).unwrap();

    let options = JobOptions {
        apply_pdfa: true,
        ..Default::default()
    };
    let request = JobRequest::merge(vec![a], ws.output_dir()).with_options(options);
    let report = worker.submit(request).unwrap().wait_blocking().unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(rasterizer.conversions(), 1);
}

#[test]
fn test_cancel_right_after_submit_is_kept() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 2);
    let b = ws.input("b.pdf", 2);
    let context = context(&ws, Arc::new(LopdfEngine::new()));
    let worker = JobWorker::spawn(Arc::clone(&context), None).unwrap();

    for _ in 0..10 {
        let handle = worker
            .submit(JobRequest::merge(vec![a.clone(), b.clone()], ws.output_dir()))
            .unwrap();
        assert!(worker.is_busy());
        context.cancel().cancel();

        let report = handle.wait_blocking().unwrap();
        assert!(report.is_cancelled());
    }
    assert!(ws.outputs().is_empty());
    assert!(ws.temp_files().is_empty());
}

#[test]
fn test_cancel_from_previous_job_does_not_leak() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let context = context(&ws, Arc::new(LopdfEngine::new()));
    let worker = JobWorker::spawn(Arc::clone(&context), None).unwrap();
    context.cancel().cancel();

    let report = worker
        .submit(JobRequest::merge(vec![a], ws.output_dir()))
        .unwrap()
        .wait_blocking()
        .unwrap();
    assert_eq!(report.state, JobState::Done);
}

/// Engine whose first load panics.
struct PanickingEngine {
    inner: LopdfEngine,
    armed: AtomicBool,
}

impl DocumentEngine for PanickingEngine {
    fn load(&self, path: &Path) -> Result<Document> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("malformed cross-reference table");
        }
        self.inner.load(path)
    }

    fn append(&self, target: &mut Document, source: Document) -> Result<()> {
        self.inner.append(target, source)
    }

    fn select_pages(&self, doc: &Document, pages: &[u32]) -> Result<Document> {
        self.inner.select_pages(doc, pages)
    }

    fn strip_metadata(&self, doc: &mut Document) -> Result<()> {
        self.inner.strip_metadata(doc)
    }

    fn encrypt(&self, doc: &mut Document, password: &Password) -> Result<()> {
        self.inner.encrypt(doc, password)
    }

    fn save(&self, doc: &mut Document, path: &Path, compress: bool) -> Result<()> {
        self.inner.save(doc, path, compress)
    }
}

#[test]
fn test_worker_survives_a_panicking_job() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let engine = PanickingEngine {
        inner: LopdfEngine::new(),
        armed: AtomicBool::new(true),
    };
    let context = context(&ws, Arc::new(engine));
    let worker = JobWorker::spawn(context, None).unwrap();

    let err = worker
        .submit(JobRequest::merge(vec![a.clone()], ws.output_dir()))
        .unwrap()
        .wait_blocking()
        .unwrap_err();
    assert!(matches!(err, PdfSmithError::Processing { .. }));
    assert!(!worker.is_busy());

    let report = worker
        .submit(JobRequest::merge(vec![a], ws.output_dir()))
        .unwrap()
        .wait_blocking()
        .unwrap();
    assert_eq!(report.state, JobState::Done);
    assert_eq!(ws.outputs().len(), 1);
}
