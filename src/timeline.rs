// DIRTYBENCH CYCLE TIMELINE
// ONE MONOTONIC TIMESTAMP PER COMPLETED CYCLE, IN CHRONOLOGICAL ORDER.
// UNBOUNDED: ANALYSIS NEEDS EVERY CYCLE, NOT A WINDOW.

use crate::clock::monotonic_secs;

pub struct CycleLog {
    start: f64,
    times: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleSummary {
    pub cycles: usize,
    pub elapsed_s: f64,
    pub mean_gap_s: f64,
    pub max_gap_s: f64,
}

impl CycleLog {
    pub fn new() -> Self {
        Self::starting_at(monotonic_secs())
    }

    pub fn starting_at(start: f64) -> Self {
        Self { start, times: Vec::new() }
    }

    // CALLED ONCE PER COMPLETED CYCLE. NEVER FOR A CYCLE CUT SHORT BY STOP.
    pub fn record(&mut self) {
        self.push(monotonic_secs());
    }

    pub fn push(&mut self, t: f64) {
        self.times.push(t);
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn into_times(self) -> Vec<f64> {
        self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    // GAPS ARE MEASURED FROM THE LOOP START, SO THE FIRST CYCLE COUNTS TOO
    pub fn summary(&self) -> CycleSummary {
        let mut prev = self.start;
        let mut max_gap = 0.0f64;
        for &t in &self.times {
            max_gap = max_gap.max(t - prev);
            prev = t;
        }
        let elapsed = prev - self.start;
        let cycles = self.times.len();
        CycleSummary {
            cycles,
            elapsed_s: elapsed,
            mean_gap_s: if cycles > 0 { elapsed / cycles as f64 } else { 0.0 },
            max_gap_s: max_gap,
        }
    }
}

impl Default for CycleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CYCLES: {}  ELAPSED: {:.3}s  MEAN GAP: {:.1}ms  MAX GAP: {:.1}ms",
            self.cycles, self.elapsed_s, self.mean_gap_s * 1000.0, self.max_gap_s * 1000.0)
    }
}
