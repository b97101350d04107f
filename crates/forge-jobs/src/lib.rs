//! Post-commit hook matching, needs-path resolution, a bounded worker pool,
//! retry with backoff, and a dead-letter queue (C12).
//!
//! Job records follow the shape of `ob-workflow::task_queue::TaskResult`
//! (attempt counter, typed status, an idempotency-shaped dedup key); the
//! worker pool is `tokio::task::JoinSet`-based, mirroring
//! `sem_os_server::dispatcher::OutboxDispatcher`'s claim/process/retry loop
//! but fanned out across N concurrent workers instead of one.

pub mod dispatch;
pub mod provider;
pub mod queue;
pub mod worker;

pub use dispatch::HookQueueDispatcher;
pub use provider::{Capability, ProviderError, ProviderRegistry};
pub use queue::{EnqueueError, JobQueue, JobRecord, JobStatus};
pub use worker::{JobError, JobWorkerPool, NeedsResolver, WorkerConfig};
