//! The job-metrics hook: a trait every crate that runs or schedules jobs can
//! call into, implemented once by whichever facade wires a concrete
//! collector in.
//!
//! Lives here rather than in `qcoord-job` because both `qcoord-job` (job
//! completion) and `qcoord-scheduler` (queue admission) need to record
//! against it, and neither depends on the other.

use std::fmt::Display;
use std::time::Duration;

/// One of the five job kinds, stripped of its request payload, for use as a
/// metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobKindLabel {
    LoadCollection,
    LoadPartition,
    ReleaseCollection,
    ReleasePartition,
    SyncNewCreatedPartition,
}

impl JobKindLabel {
    pub const ALL: [JobKindLabel; 5] = [
        JobKindLabel::LoadCollection,
        JobKindLabel::LoadPartition,
        JobKindLabel::ReleaseCollection,
        JobKindLabel::ReleasePartition,
        JobKindLabel::SyncNewCreatedPartition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKindLabel::LoadCollection => "load_collection",
            JobKindLabel::LoadPartition => "load_partition",
            JobKindLabel::ReleaseCollection => "release_collection",
            JobKindLabel::ReleasePartition => "release_partition",
            JobKindLabel::SyncNewCreatedPartition => "sync_new_created_partition",
        }
    }
}

impl Display for JobKindLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job's run terminated, for use as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobOutcome {
    pub const ALL: [JobOutcome; 4] = [
        JobOutcome::Succeeded,
        JobOutcome::Failed,
        JobOutcome::TimedOut,
        JobOutcome::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::TimedOut => "timed_out",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

impl Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded by the scheduler and by a job's own run loop. Implementations
/// must be cheap and non-blocking: this is called from the hot path of every
/// job admission and completion.
pub trait JobMetricsSink: Send + Sync {
    /// A job of `kind` was accepted onto its collection's queue.
    fn record_submitted(&self, kind: JobKindLabel);

    /// A job was rejected because its collection's queue was at capacity.
    fn record_queue_full(&self, kind: JobKindLabel);

    /// A job of `kind` ran to completion (successful or not) in `duration`,
    /// measured from acceptance onto the queue to the terminal result being
    /// sent to the caller's `JobHandle`.
    fn record_completed(&self, kind: JobKindLabel, outcome: JobOutcome, duration: Duration);
}

/// A [`JobMetricsSink`] that discards everything. The default when an
/// embedder doesn't wire in a collector.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl JobMetricsSink for NoopMetricsSink {
    fn record_submitted(&self, _kind: JobKindLabel) {}
    fn record_queue_full(&self, _kind: JobKindLabel) {}
    fn record_completed(&self, _kind: JobKindLabel, _outcome: JobOutcome, _duration: Duration) {}
}
