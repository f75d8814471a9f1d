use std::collections::HashMap;
use std::time::Instant;

/// Observer for detection-session events.
///
/// Keeps the session free of any particular output mechanism: the CLI
/// aggregates and prints, tests and embedders can stay silent.
pub trait PipelineLogger: Send {
    /// Report how many sampled frames have produced a published batch.
    fn progress(&mut self, completed: usize, sampled: usize);

    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. frames dropped in one run).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _completed: usize, _sampled: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Aggregates per-stage timings and metrics and reports them through
/// `log`, with a summary when the run ends.
///
/// Progress lines are throttled to one every `throttle_batches` batches.
pub struct StdoutPipelineLogger {
    throttle_batches: usize,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
    completed: usize,
    sampled: usize,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_batches: usize) -> Self {
        Self {
            throttle_batches: throttle_batches.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            completed: 0,
            sampled: 0,
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Session summary ({} sampled, {} completed, {elapsed_s:.1}s):",
            self.sampled, self.completed
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let max_ms = durations.iter().copied().fold(0.0, f64::max);
            lines.push(format!(
                "  {stage:12}: avg {:6.1}ms  max {max_ms:6.1}ms  ({} samples)",
                mean(durations),
                durations.len()
            ));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            let values = &self.metrics[name];
            let total: f64 = values.iter().sum();
            lines.push(format!("  {name}: total {total:.0}, avg {:.1}", mean(values)));
        }

        if elapsed_s > 0.0 {
            lines.push(format!(
                "  Throughput: {:.1} batches/s",
                self.completed as f64 / elapsed_s
            ));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(15)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, completed: usize, sampled: usize) {
        self.completed = completed;
        self.sampled = sampled;
        if completed > 0 && completed % self.throttle_batches == 0 {
            log::info!("Completed {completed} of {sampled} sampled frames");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
