use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{Instrument, Span};

use crate::{
    config::JobManagerConfig,
    entities::{DocumentType, JobId, JobPage, JobSnapshot, JobStats, ProcessOptions},
    error::{FailureReason, JobError},
    processor::{DocumentProcessor, ProcessRequest},
};

use job::Job;
use registry::Registry;

mod job;
mod registry;

pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug)]
struct DispatchRequest {
    job_id: JobId,
    filename: String,
    payload: Arc<[u8]>,
    document_type: DocumentType,
    options: ProcessOptions,
    queued_at: Instant,
}

#[derive(Debug)]
struct Shared {
    config: JobManagerConfig,
    registry: Mutex<Registry>,
    changes: watch::Sender<u64>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies a transition to one job and wakes waiters if it took effect.
    fn commit<F>(&self, job_id: JobId, transition: F) -> bool
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let applied = self
            .registry()
            .get_mut(&job_id)
            .map(transition)
            .unwrap_or(false);
        if applied {
            self.changes.send_modify(|version| *version = version.wrapping_add(1));
        }
        applied
    }
}

/// Accepts documents, queues them in submission order and runs at most
/// `max_concurrent_tasks` of them at once through a [`DocumentProcessor`].
///
/// Cloning is cheap and every clone talks to the same registry. The dispatcher
/// task stops once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct JobManager {
    shared: Arc<Shared>,
    queue: UnboundedSender<(DispatchRequest, Span)>,
}

impl JobManager {
    /// Must be called from within a tokio runtime.
    pub fn new<P: DocumentProcessor>(config: JobManagerConfig, processor: P) -> Self {
        Self::with_processor(config, Arc::new(processor))
    }

    pub fn with_processor(
        config: JobManagerConfig,
        processor: Arc<dyn DocumentProcessor>,
    ) -> Self {
        let (queue_sender, queue_receiver) = mpsc::unbounded_channel();
        let (changes, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            config: config.clamped(),
            registry: Mutex::new(Registry::default()),
            changes,
        });
        tracing::info!(
            processor = processor.name(),
            max_concurrent_tasks = shared.config.max_concurrent_tasks,
            task_timeout_ms = %shared.config.task_timeout.as_millis(),
            "job manager started"
        );

        tokio::task::spawn(start_dispatcher(shared.clone(), processor, queue_receiver));
        Self {
            shared,
            queue: queue_sender,
        }
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.shared.config
    }

    /// Validates and registers a new job, then queues it for processing.
    /// Returns as soon as the job is recorded as `Pending`.
    pub fn submit(
        &self,
        payload: impl Into<Arc<[u8]>>,
        filename: &str,
        options: ProcessOptions,
    ) -> Result<JobId, JobError> {
        let document_type = DocumentType::from_filename(filename)?;
        let payload: Arc<[u8]> = payload.into();
        if payload.is_empty() {
            return Err(JobError::EmptyContent);
        }
        let file_size = payload.len() as u64;
        let limit = self.shared.config.max_file_size;
        if file_size > limit {
            return Err(JobError::FileTooLarge {
                size: file_size,
                limit,
            });
        }

        let job = Job::new(filename, file_size, document_type, options.clone());
        let job_id = job.id;
        let req = DispatchRequest {
            job_id,
            filename: filename.to_owned(),
            payload,
            document_type,
            options,
            queued_at: Instant::now(),
        };

        // Registry order and queue order must agree.
        let mut registry = self.shared.registry();
        self.queue
            .send((req, Span::current()))
            .map_err(|_| JobError::Closed)?;
        registry.insert(job);
        drop(registry);
        self.shared
            .changes
            .send_modify(|version| *version = version.wrapping_add(1));

        tracing::info!(%job_id, filename, file_size, %document_type, "job submitted");
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, JobError> {
        self.shared
            .registry()
            .get(&job_id)
            .map(Job::snapshot)
            .ok_or(JobError::NotFound(job_id))
    }

    /// Every job in submission order, as of this call.
    pub fn list_jobs(&self) -> impl ExactSizeIterator<Item = JobSnapshot> {
        let snapshots: Vec<JobSnapshot> =
            self.shared.registry().iter().map(Job::snapshot).collect();
        snapshots.into_iter()
    }

    /// One 1-based page of [`JobManager::list_jobs`].
    pub fn list_page(&self, page: usize, page_size: usize) -> Result<JobPage, JobError> {
        if page == 0 || page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(JobError::InvalidPage { page, page_size });
        }
        let registry = self.shared.registry();
        let total = registry.len();
        let jobs = registry
            .iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .map(Job::snapshot)
            .collect();
        Ok(JobPage {
            jobs,
            total,
            page,
            page_size,
        })
    }

    pub fn stats(&self) -> JobStats {
        self.shared
            .registry()
            .stats(self.shared.config.max_concurrent_tasks)
    }

    pub fn len(&self) -> usize {
        self.shared.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once the job reaches a terminal state.
    pub async fn wait_for(&self, job_id: JobId) -> Result<JobSnapshot, JobError> {
        let mut changes = self.shared.changes.subscribe();
        loop {
            let snapshot = self.get_status(job_id)?;
            if snapshot.state.is_terminal() {
                return Ok(snapshot);
            }
            if changes.changed().await.is_err() {
                return Err(JobError::Closed);
            }
        }
    }
}

async fn start_dispatcher(
    shared: Arc<Shared>,
    processor: Arc<dyn DocumentProcessor>,
    mut input_rx: UnboundedReceiver<(DispatchRequest, Span)>,
) {
    let slots = Arc::new(Semaphore::new(shared.config.max_concurrent_tasks));
    while let Some((req, span)) = input_rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let job_id = req.job_id;
        if !shared.commit(job_id, Job::mark_running) {
            tracing::warn!(%job_id, "queued job is no longer pending, skipping");
            continue;
        }

        let queue_time = req.queued_at.elapsed().as_millis();
        let job_span = tracing::info_span!(
            parent: &span,
            "job",
            %job_id,
            filename = %req.filename,
            document_type = %req.document_type
        );
        job_span.in_scope(|| tracing::debug!("job queue time took: {queue_time}ms"));
        tokio::spawn(run_job(shared.clone(), processor.clone(), req, permit).instrument(job_span));
    }
    tracing::debug!("job dispatcher stopped");
}

async fn run_job(
    shared: Arc<Shared>,
    processor: Arc<dyn DocumentProcessor>,
    req: DispatchRequest,
    permit: OwnedSemaphorePermit,
) {
    let DispatchRequest {
        job_id,
        filename,
        payload,
        document_type,
        options,
        ..
    } = req;
    let task_timeout = shared.config.task_timeout;
    let start = Instant::now();

    let request = ProcessRequest {
        job_id,
        filename,
        payload,
        document_type,
        options,
    };
    let mut handle =
        tokio::spawn(async move { processor.process(request).await }.in_current_span());

    // `timeout` saturates oversized durations instead of overflowing the deadline.
    let outcome = tokio::time::timeout(task_timeout, &mut handle).await;
    let duration = start.elapsed().as_millis();
    match outcome {
        Ok(Ok(Ok(result))) => {
            tracing::info!("job completed in {duration}ms");
            shared.commit(job_id, |job| job.mark_completed(result));
        }
        Ok(Ok(Err(e))) => {
            tracing::error!("job failed after {duration}ms: {e}");
            shared.commit(job_id, |job| {
                job.mark_failed(FailureReason::processing_failed(e.to_string()))
            });
        }
        Ok(Err(join_error)) => {
            let message = if join_error.is_panic() {
                "processor panicked"
            } else {
                "processor task was cancelled"
            };
            tracing::error!("job failed after {duration}ms: {message}");
            shared.commit(job_id, |job| {
                job.mark_failed(FailureReason::processing_failed(message))
            });
        }
        Err(_) => {
            handle.abort();
            tracing::warn!(
                "job exceeded its deadline of {}ms, abandoning",
                task_timeout.as_millis()
            );
            shared.commit(job_id, |job| {
                job.mark_timed_out(FailureReason::deadline_exceeded(task_timeout))
            });
        }
    }
    drop(permit);
}
