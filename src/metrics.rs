use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How an agent turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Exhausted,
    Stopped,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub agent: String,
    pub duration: Duration,
    pub attempts: usize,
    pub tool_runs: usize,
    pub tool_failures: usize,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn success_rate(reports: &[Self]) -> f32 {
        if reports.is_empty() {
            return 0.0;
        }
        let successes = reports
            .iter()
            .filter(|r| r.outcome == RunOutcome::Done)
            .count();
        successes as f32 / reports.len() as f32
    }
}

pub const DEFAULT_REPORT_HISTORY: usize = 100;

/// Shared sink for the most recent run reports; clones record into the same
/// history. The oldest report is dropped once `capacity` is reached.
#[derive(Clone)]
pub struct MetricsTracker {
    reports: Arc<Mutex<VecDeque<RunReport>>>,
    capacity: usize,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REPORT_HISTORY)
    }
}

impl MetricsTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            reports: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn start_run(&self, agent: impl Into<String>) -> RunGuard {
        RunGuard {
            agent: agent.into(),
            start: Instant::now(),
            attempts: 0,
            tool_runs: 0,
            tool_failures: 0,
            metrics: self.clone(),
        }
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.lock().iter().cloned().collect()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.lock().back().cloned()
    }

    fn record(&self, report: RunReport) {
        let mut reports = self.lock();
        if reports.len() == self.capacity {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RunReport>> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct RunGuard {
    agent: String,
    start: Instant,
    attempts: usize,
    tool_runs: usize,
    tool_failures: usize,
    metrics: MetricsTracker,
}

impl RunGuard {
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_tool_run(&mut self, success: bool) {
        self.tool_runs += 1;
        if !success {
            self.tool_failures += 1;
        }
    }

    pub fn finish(self, outcome: RunOutcome) -> RunReport {
        let report = RunReport {
            agent: self.agent,
            duration: self.start.elapsed(),
            attempts: self.attempts,
            tool_runs: self.tool_runs,
            tool_failures: self.tool_failures,
            outcome,
        };
        self.metrics.record(report.clone());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_success_rate() {
        let tracker = MetricsTracker::default();
        let mut run = tracker.start_run("recon_agent");
        run.record_attempt();
        run.record_tool_run(false);
        run.record_attempt();
        run.record_tool_run(true);
        let report = run.finish(RunOutcome::Done);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.tool_failures, 1);

        tracker.start_run("file_agent").finish(RunOutcome::Exhausted);
        let reports = tracker.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(RunReport::success_rate(&reports), 0.5);
        assert_eq!(tracker.last_report().unwrap().agent, "file_agent");
    }

    #[test]
    fn history_is_bounded() {
        let tracker = MetricsTracker::with_capacity(3);
        for i in 0..5 {
            tracker.start_run(format!("run-{i}")).finish(RunOutcome::Done);
        }
        let agents: Vec<String> = tracker.reports().into_iter().map(|r| r.agent).collect();
        assert_eq!(agents, vec!["run-2", "run-3", "run-4"]);
        assert_eq!(tracker.last_report().unwrap().agent, "run-4");
    }
}
