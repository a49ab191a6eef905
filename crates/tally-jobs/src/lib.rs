//! # tally-jobs
//!
//! The asynchronous half of the pipeline:
//!
//! - **[`creators`]**: Chat and message creation workers behind [`JobHandler`]
//! - **[`queue`]**: Bounded in-process queues with retry, backoff and a dead set
//! - **[`router`]**: Class-based routing of job envelopes to their queue
//! - **[`reconcile`]**: Overwrite of durable counts from the counter cache
//! - **[`scheduler`]**: Periodic reconciliation loops
//! - **[`producer`]**: The ingress-side increment contract, for tests and the CLI

#![deny(unsafe_code)]

pub mod creators;
pub mod errors;
pub mod outcome;
pub mod producer;
pub mod queue;
pub mod reconcile;
pub mod router;
pub mod scheduler;

pub use creators::{ChatCreator, CreationHandler, JobHandler, MessageCreator};
pub use errors::{JobError, ProducerError, Result};
pub use outcome::{DiscardReason, JobOutcome};
pub use producer::Producer;
pub use queue::{DeadJob, DeadSet, QueueConfig, WorkerPool};
pub use reconcile::{CountKind, ReconcileReport, Reconciler};
pub use router::JobRouter;
pub use scheduler::{ReconcileSchedule, Scheduler};
