//! Process-wide job metrics, exported in Prometheus text exposition format.
//!
//! Shaped after the reference workspace's own instrumentation: plain atomic
//! counters and pre-allocated histogram buckets rather than a metrics-crate
//! registry, so recording a job outcome never allocates or blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use qcoord_types::{JobKindLabel, JobMetricsSink, JobOutcome};

const DURATION_BUCKETS_MS: [f64; 9] = [1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];
const KIND_COUNT: usize = JobKindLabel::ALL.len();
const OUTCOME_COUNT: usize = JobOutcome::ALL.len();

fn kind_index(kind: JobKindLabel) -> usize {
    match kind {
        JobKindLabel::LoadCollection => 0,
        JobKindLabel::LoadPartition => 1,
        JobKindLabel::ReleaseCollection => 2,
        JobKindLabel::ReleasePartition => 3,
        JobKindLabel::SyncNewCreatedPartition => 4,
    }
}

fn outcome_index(outcome: JobOutcome) -> usize {
    match outcome {
        JobOutcome::Succeeded => 0,
        JobOutcome::Failed => 1,
        JobOutcome::TimedOut => 2,
        JobOutcome::Cancelled => 3,
    }
}

/// Per-process job metrics, safe to share behind an `Arc` and record into
/// from any number of scheduler workers concurrently.
#[derive(Debug)]
pub struct PrometheusMetrics {
    submitted_total: [AtomicU64; KIND_COUNT],
    queue_full_total: [AtomicU64; KIND_COUNT],
    completed_total: [[AtomicU64; OUTCOME_COUNT]; KIND_COUNT],
    duration_buckets_ms: [[AtomicU64; 9]; KIND_COUNT],
    duration_sum_ms: [AtomicU64; KIND_COUNT],
    duration_count: [AtomicU64; KIND_COUNT],
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self {
            submitted_total: std::array::from_fn(|_| AtomicU64::new(0)),
            queue_full_total: std::array::from_fn(|_| AtomicU64::new(0)),
            completed_total: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            duration_buckets_ms: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            duration_sum_ms: std::array::from_fn(|_| AtomicU64::new(0)),
            duration_count: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Renders every counter and histogram in Prometheus text exposition
    /// format, suitable for serving from a `/metrics` endpoint.
    pub fn export_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let _ = writeln!(out, "# HELP qcoord_jobs_submitted_total Jobs accepted onto a collection queue");
        let _ = writeln!(out, "# TYPE qcoord_jobs_submitted_total counter");
        for kind in JobKindLabel::ALL {
            let _ = writeln!(
                out,
                "qcoord_jobs_submitted_total{{kind=\"{kind}\"}} {}",
                self.submitted_total[kind_index(kind)].load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# HELP qcoord_jobs_queue_full_total Jobs rejected because their collection queue was full");
        let _ = writeln!(out, "# TYPE qcoord_jobs_queue_full_total counter");
        for kind in JobKindLabel::ALL {
            let _ = writeln!(
                out,
                "qcoord_jobs_queue_full_total{{kind=\"{kind}\"}} {}",
                self.queue_full_total[kind_index(kind)].load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# HELP qcoord_jobs_completed_total Jobs that ran to a terminal outcome");
        let _ = writeln!(out, "# TYPE qcoord_jobs_completed_total counter");
        for kind in JobKindLabel::ALL {
            for outcome in JobOutcome::ALL {
                let _ = writeln!(
                    out,
                    "qcoord_jobs_completed_total{{kind=\"{kind}\",outcome=\"{outcome}\"}} {}",
                    self.completed_total[kind_index(kind)][outcome_index(outcome)].load(Ordering::Relaxed)
                );
            }
        }

        let _ = writeln!(out, "# HELP qcoord_job_duration_ms How long a job took from submission to its terminal result");
        let _ = writeln!(out, "# TYPE qcoord_job_duration_ms histogram");
        for kind in JobKindLabel::ALL {
            let idx = kind_index(kind);
            let mut cumulative = 0u64;
            for (bucket_idx, bound) in DURATION_BUCKETS_MS.iter().enumerate() {
                cumulative += self.duration_buckets_ms[idx][bucket_idx].load(Ordering::Relaxed);
                let _ = writeln!(out, "qcoord_job_duration_ms_bucket{{kind=\"{kind}\",le=\"{bound}\"}} {cumulative}");
            }
            let total_count = self.duration_count[idx].load(Ordering::Relaxed);
            let _ = writeln!(out, "qcoord_job_duration_ms_bucket{{kind=\"{kind}\",le=\"+Inf\"}} {total_count}");
            let _ = writeln!(
                out,
                "qcoord_job_duration_ms_sum{{kind=\"{kind}\"}} {}",
                self.duration_sum_ms[idx].load(Ordering::Relaxed)
            );
            let _ = writeln!(out, "qcoord_job_duration_ms_count{{kind=\"{kind}\"}} {total_count}");
        }

        out
    }
}

impl JobMetricsSink for PrometheusMetrics {
    fn record_submitted(&self, kind: JobKindLabel) {
        self.submitted_total[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    fn record_queue_full(&self, kind: JobKindLabel) {
        self.queue_full_total[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    fn record_completed(&self, kind: JobKindLabel, outcome: JobOutcome, duration: Duration) {
        let kind_idx = kind_index(kind);
        self.completed_total[kind_idx][outcome_index(outcome)].fetch_add(1, Ordering::Relaxed);

        let ms = duration.as_secs_f64() * 1000.0;
        for (bucket_idx, &bound) in DURATION_BUCKETS_MS.iter().enumerate() {
            if ms <= bound {
                self.duration_buckets_ms[kind_idx][bucket_idx].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        self.duration_sum_ms[kind_idx].fetch_add(ms.round() as u64, Ordering::Relaxed);
        self.duration_count[kind_idx].fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submitted_and_queue_full_are_tracked_per_kind() {
        let metrics = PrometheusMetrics::new();
        metrics.record_submitted(JobKindLabel::LoadCollection);
        metrics.record_submitted(JobKindLabel::LoadCollection);
        metrics.record_queue_full(JobKindLabel::LoadCollection);
        metrics.record_submitted(JobKindLabel::ReleaseCollection);

        assert_eq!(metrics.submitted_total[kind_index(JobKindLabel::LoadCollection)].load(Ordering::Relaxed), 2);
        assert_eq!(metrics.queue_full_total[kind_index(JobKindLabel::LoadCollection)].load(Ordering::Relaxed), 1);
        assert_eq!(metrics.submitted_total[kind_index(JobKindLabel::ReleaseCollection)].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn completed_outcomes_are_tracked_independently() {
        let metrics = PrometheusMetrics::new();
        metrics.record_completed(JobKindLabel::LoadCollection, JobOutcome::Succeeded, Duration::from_millis(5));
        metrics.record_completed(JobKindLabel::LoadCollection, JobOutcome::Failed, Duration::from_millis(5));
        metrics.record_completed(JobKindLabel::LoadCollection, JobOutcome::Succeeded, Duration::from_millis(5));

        let idx = kind_index(JobKindLabel::LoadCollection);
        assert_eq!(metrics.completed_total[idx][outcome_index(JobOutcome::Succeeded)].load(Ordering::Relaxed), 2);
        assert_eq!(metrics.completed_total[idx][outcome_index(JobOutcome::Failed)].load(Ordering::Relaxed), 1);
        assert_eq!(metrics.duration_count[idx].load(Ordering::Relaxed), 3);
    }

    #[test]
    fn export_includes_every_kind_and_outcome() {
        let metrics = PrometheusMetrics::new();
        metrics.record_submitted(JobKindLabel::SyncNewCreatedPartition);
        metrics.record_completed(JobKindLabel::SyncNewCreatedPartition, JobOutcome::TimedOut, Duration::from_millis(2000));

        let text = metrics.export_prometheus();
        assert!(text.contains("qcoord_jobs_submitted_total{kind=\"sync_new_created_partition\"} 1"));
        assert!(text.contains("qcoord_jobs_completed_total{kind=\"sync_new_created_partition\",outcome=\"timed_out\"} 1"));
        assert!(text.contains("qcoord_job_duration_ms_bucket{kind=\"sync_new_created_partition\",le=\"+Inf\"} 1"));
    }
}
