use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for per-request pipeline events.
///
/// Use cases report stage timings and counters here instead of logging
/// directly, so callers decide whether anything is printed.
pub trait PipelineLogger: Send {
    /// Faces collected so far out of the requested maximum.
    fn progress(&mut self, current: usize, total: usize);

    /// Duration of one invocation of a named stage.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// A point-in-time value such as the number of frames scanned.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-request summary. Default: no-op.
    fn summary(&self) {}
}

/// Discards every event.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Aggregates stage timings and metrics for one video and reports them
/// through the `log` facade.
pub struct LogPipelineLogger {
    label: String,
    timings: BTreeMap<String, Vec<f64>>,
    metrics: BTreeMap<String, f64>,
    start_time: Instant,
    faces: usize,
}

impl LogPipelineLogger {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            start_time: Instant::now(),
            faces: 0,
        }
    }

    /// Formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!(
            "Summary for {} ({} faces, {:.2}s total):",
            self.label,
            self.faces,
            elapsed_ms / 1000.0
        )];

        for (stage, durations) in &self.timings {
            let total_ms: f64 = durations.iter().sum();
            let calls = durations.len();
            let avg_ms = if calls == 0 { 0.0 } else { total_ms / calls as f64 };
            lines.push(format!(
                "  {stage:10}: {calls:4} x avg {avg_ms:7.2}ms  total {total_ms:8.1}ms"
            ));
        }

        for (name, value) in &self.metrics {
            lines.push(format!("  {name}: {value}"));
        }

        Some(lines.join("\n"))
    }

    /// Recorded durations for a stage.
    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    /// Latest value of a metric.
    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

impl PipelineLogger for LogPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.faces = current;
        if current == total {
            log::debug!("{}: collected {current}/{total} faces", self.label);
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{}: {message}", self.label);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::debug!("{text}");
        }
    }
}
