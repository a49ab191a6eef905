//! In-process job queue with bounded retries.
//!
//! Each [`WorkerPool`] owns one bounded channel drained by `concurrency`
//! workers. A worker runs a job on the blocking pool; on error it sleeps
//! for the policy's backoff and tries again, up to
//! [`RetryPolicy::attempts`]. Exhausted jobs land in the [`DeadSet`].

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tally_core::{JobEnvelope, JobKind, RetryPolicy};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::creators::JobHandler;
use crate::errors::{JobError, Result};

/// Sizing and retry behaviour of one queue.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Concurrent workers draining the queue.
    pub concurrency: usize,
    /// Jobs buffered before `enqueue` waits.
    pub capacity: usize,
    /// Attempts and backoff for failing jobs.
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// A job that exhausted its attempts.
#[derive(Clone, Debug, Serialize)]
pub struct DeadJob {
    /// Job id from the envelope.
    pub jid: String,
    /// Job class.
    pub class: String,
    /// Queue the job ran on.
    pub queue: String,
    /// Error from the last attempt.
    pub error: String,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// RFC 3339 time the job was abandoned.
    pub died_at: String,
    /// Original envelope, for replay.
    pub envelope: JobEnvelope,
}

/// Operator-visible record of permanently failed jobs.
#[derive(Clone, Debug, Default)]
pub struct DeadSet {
    jobs: Arc<Mutex<Vec<DeadJob>>>,
}

impl DeadSet {
    /// Create an empty dead set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job that will not be attempted again.
    pub fn push(&self, job: DeadJob) {
        self.jobs.lock().push(job);
    }

    /// Snapshot in the order jobs died.
    pub fn list(&self) -> Vec<DeadJob> {
        self.jobs.lock().clone()
    }

    /// Jobs recorded so far.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether no job has died.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

struct QueuedJob {
    envelope: JobEnvelope,
    job: JobKind,
}

#[derive(Clone)]
struct Worker {
    queue: &'static str,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
    dead: DeadSet,
    cancel: CancellationToken,
}

/// A queue and the workers draining it.
pub struct WorkerPool {
    queue: &'static str,
    sender: mpsc::Sender<QueuedJob>,
    workers: JoinSet<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue", &self.queue)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn the workers. Must be called inside a Tokio runtime.
    pub fn start(
        queue: &'static str,
        handler: Arc<dyn JobHandler>,
        config: &QueueConfig,
        dead: DeadSet,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let mut workers = JoinSet::new();
        let cancel = CancellationToken::new();
        let worker = Worker {
            queue,
            handler,
            retry: config.retry.clone(),
            dead,
            cancel: cancel.clone(),
        };

        let concurrency = config.concurrency.max(1);
        for id in 0..concurrency {
            let _ = workers.spawn(worker.clone().run(id, Arc::clone(&receiver)));
        }
        info!(queue, concurrency, capacity = config.capacity, "worker pool started");

        Self {
            queue,
            sender,
            workers,
            cancel,
        }
    }

    /// Name of the queue this pool drains.
    pub fn queue(&self) -> &'static str {
        self.queue
    }

    /// Validate and enqueue a job. Waits while the queue is full.
    ///
    /// Envelopes that do not decode are rejected here and never retried.
    pub async fn enqueue(&self, envelope: JobEnvelope) -> Result<()> {
        let job = envelope.decode()?;
        debug!(queue = self.queue, jid = %envelope.jid, class = %envelope.class, "enqueue");
        self.sender
            .send(QueuedJob { envelope, job })
            .await
            .map_err(|_| JobError::QueueClosed(self.queue))
    }

    /// Stop accepting jobs, let workers drain the queue, and wait for them.
    pub async fn shutdown(self) {
        let Self {
            queue,
            sender,
            mut workers,
            ..
        } = self;
        drop(sender);
        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(queue, error = %err, "worker task panicked");
            }
        }
        info!(queue, "worker pool drained");
    }

    /// Stop without draining. A job sleeping before a retry is recorded as dead.
    pub async fn abort(self) {
        self.cancel.cancel();
        let queue = self.queue;
        self.shutdown().await;
        warn!(queue, "worker pool aborted");
    }
}

impl Worker {
    async fn run(self, id: usize, receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>) {
        loop {
            let next = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => None,
                    job = rx.recv() => job,
                }
            };
            let Some(queued) = next else { break };
            self.process(queued).await;
        }
        debug!(queue = self.queue, worker = id, "worker stopped");
    }

    async fn process(&self, queued: QueuedJob) {
        let QueuedJob { envelope, job } = queued;
        let job = Arc::new(job);
        let attempts = self.retry.attempts(envelope.retry);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let handler = Arc::clone(&self.handler);
            let task_job = Arc::clone(&job);
            let result = tokio::task::spawn_blocking(move || handler.handle(&task_job))
                .await
                .map_err(JobError::from)
                .and_then(|r| r);

            let err = match result {
                Ok(outcome) => {
                    counter!(
                        "jobs_processed_total",
                        "queue" => self.queue,
                        "outcome" => outcome.as_str()
                    )
                    .increment(1);
                    debug!(
                        queue = self.queue,
                        jid = %envelope.jid,
                        attempt,
                        outcome = outcome.as_str(),
                        "job done"
                    );
                    return;
                }
                Err(err) => err,
            };

            if attempt >= attempts {
                self.bury(envelope, err.to_string(), attempt);
                return;
            }

            let delay = self.retry.delay_for(attempt - 1);
            counter!("jobs_retried_total", "queue" => self.queue).increment(1);
            warn!(
                queue = self.queue,
                jid = %envelope.jid,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "job failed, will retry"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.bury(envelope, format!("interrupted before retry: {err}"), attempt);
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn bury(&self, envelope: JobEnvelope, error: String, attempts: u32) {
        counter!("jobs_processed_total", "queue" => self.queue, "outcome" => "failed").increment(1);
        counter!("jobs_dead_total", "queue" => self.queue).increment(1);
        error!(
            queue = self.queue,
            jid = %envelope.jid,
            class = %envelope.class,
            attempts,
            error = %error,
            "job exhausted retries"
        );
        self.dead.push(DeadJob {
            jid: envelope.jid.clone(),
            class: envelope.class.clone(),
            queue: self.queue.to_string(),
            error,
            attempts,
            died_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            envelope,
        });
    }
}
