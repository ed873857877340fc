//! The single job worker.
//!
//! Heavy work never runs on the caller's thread. A dedicated OS thread owns
//! a current-thread tokio runtime and executes submitted jobs strictly one
//! after another. Results come back through a one-shot channel and progress
//! through the pipeline's event channel, leaving it to the front end to move
//! them onto its own thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::cancel::CancelToken;
use crate::context::AppContext;
use crate::error::{PdfSmithError, Result};
use crate::job::JobRequest;
use crate::pipeline::{JobReport, PipelineEvent};

struct WorkItem {
    request: JobRequest,
    reply: oneshot::Sender<Result<JobReport>>,
}

/// Pending result of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    reply: oneshot::Receiver<Result<JobReport>>,
}

impl JobHandle {
    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<JobReport> {
        self.reply
            .await
            .unwrap_or_else(|_| Err(PdfSmithError::other("job worker stopped")))
    }

    /// Wait from synchronous code. Must not be called on a runtime thread.
    pub fn wait_blocking(self) -> Result<JobReport> {
        self.reply
            .blocking_recv()
            .unwrap_or_else(|_| Err(PdfSmithError::other("job worker stopped")))
    }
}

/// Dedicated thread executing one job at a time.
pub struct JobWorker {
    sender: Option<mpsc::Sender<WorkItem>>,
    busy: Arc<AtomicBool>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl JobWorker {
    /// Start the worker thread.
    ///
    /// Events of every job are published on `events` when given.
    pub fn spawn(
        context: Arc<AppContext>,
        events: Option<UnboundedSender<PipelineEvent>>,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<WorkItem>();
        let busy = Arc::new(AtomicBool::new(false));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let cancel = context.cancel().clone();
        let worker_busy = Arc::clone(&busy);
        let thread = thread::Builder::new()
            .name("pdfsmith-worker".to_string())
            .spawn(move || {
                while let Ok(item) = receiver.recv() {
                    let pipeline = context.pipeline(events.clone());
                    let run = panic::catch_unwind(AssertUnwindSafe(|| {
                        runtime.block_on(pipeline.run(item.request, context.cancel()))
                    }));
                    let result = run.unwrap_or_else(|_| {
                        error!("job panicked, worker continues with the next one");
                        Err(PdfSmithError::processing("Job", "internal error"))
                    });
                    worker_busy.store(false, Ordering::SeqCst);
                    if item.reply.send(result).is_err() {
                        debug!("job result dropped, nobody is waiting");
                    }
                }
                debug!("job worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            busy,
            cancel,
            thread: Some(thread),
        })
    }

    /// Whether a job is queued or running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Queue `request`.
    ///
    /// # Errors
    ///
    /// Returns `Overload` while another job is queued or running.
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PdfSmithError::overload("A job is already running"));
        }
        // A cancel raised from here on belongs to this job.
        self.cancel.reset();

        let (reply, receiver) = oneshot::channel();
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(WorkItem { request, reply }).is_ok())
            .unwrap_or(false);
        if !sent {
            self.busy.store(false, Ordering::SeqCst);
            return Err(PdfSmithError::other("job worker stopped"));
        }

        Ok(JobHandle { reply: receiver })
    }
}

impl Drop for JobWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after the current job.
        self.sender.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("job worker panicked");
        }
    }
}
