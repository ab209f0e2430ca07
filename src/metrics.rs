//! Automaton Metrics
//!
//! Three metric families updated by the automaton and scraped concurrently
//! by the HTTP exposition task:
//!
//! - `automata_current_state{state}` gauge, 1 for the running state
//! - `automata_time_in_state_seconds{state}` histogram
//! - `automata_state_changes_total{from_state,to_state}` counter

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Histogram bucket upper bounds in seconds
pub const TIME_IN_STATE_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

#[derive(Debug, Clone)]
struct Histogram {
    /// Non-cumulative count per bucket
    buckets: [u64; TIME_IN_STATE_BUCKETS.len()],
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: [0; TIME_IN_STATE_BUCKETS.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        if let Some(index) = TIME_IN_STATE_BUCKETS.iter().position(|bound| value <= *bound) {
            self.buckets[index] += 1;
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Default)]
struct Families {
    current_state: BTreeMap<String, f64>,
    time_in_state: BTreeMap<String, Histogram>,
    state_changes: BTreeMap<(String, String), u64>,
}

/// Metrics registry shared between the automaton and the scrape handler
#[derive(Default)]
pub struct Metrics {
    families: RwLock<Families>,
}

impl Metrics {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Families> {
        self.families.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Families> {
        self.families.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `delta` to the current-state gauge for `state`
    pub fn add_current_state(&self, state: &str, delta: f64) {
        *self.write().current_state.entry(state.to_string()).or_insert(0.0) += delta;
    }

    /// Record time spent in `state`
    pub fn observe_time_in_state(&self, state: &str, seconds: f64) {
        self.write()
            .time_in_state
            .entry(state.to_string())
            .or_insert_with(Histogram::new)
            .observe(seconds);
    }

    /// Count one transition from `from` to `to`
    pub fn record_state_change(&self, from: &str, to: &str) {
        *self
            .write()
            .state_changes
            .entry((from.to_string(), to.to_string()))
            .or_insert(0) += 1;
    }

    /// Current-state gauge value for `state`
    pub fn current_state(&self, state: &str) -> f64 {
        self.read().current_state.get(state).copied().unwrap_or(0.0)
    }

    /// Number of observations recorded for `state`
    pub fn time_in_state_count(&self, state: &str) -> u64 {
        self.read().time_in_state.get(state).map(|h| h.count).unwrap_or(0)
    }

    /// Transitions counted from `from` to `to`
    pub fn state_changes(&self, from: &str, to: &str) -> u64 {
        self.read()
            .state_changes
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Render every family in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let families = self.read();
        let mut output = String::new();

        output.push_str("# HELP automata_current_state Current state of the automata\n");
        output.push_str("# TYPE automata_current_state gauge\n");
        for (state, value) in &families.current_state {
            let _ = writeln!(output, "automata_current_state{{state=\"{}\"}} {}", state, value);
        }

        output.push_str("# HELP automata_time_in_state_seconds Time spent in each state\n");
        output.push_str("# TYPE automata_time_in_state_seconds histogram\n");
        for (state, histogram) in &families.time_in_state {
            let mut cumulative = 0;
            for (bound, count) in TIME_IN_STATE_BUCKETS.iter().zip(histogram.buckets.iter()) {
                cumulative += count;
                let _ = writeln!(
                    output,
                    "automata_time_in_state_seconds_bucket{{state=\"{}\",le=\"{}\"}} {}",
                    state, bound, cumulative
                );
            }
            let _ = writeln!(
                output,
                "automata_time_in_state_seconds_bucket{{state=\"{}\",le=\"+Inf\"}} {}",
                state, histogram.count
            );
            let _ = writeln!(output, "automata_time_in_state_seconds_sum{{state=\"{}\"}} {}", state, histogram.sum);
            let _ = writeln!(output, "automata_time_in_state_seconds_count{{state=\"{}\"}} {}", state, histogram.count);
        }

        output.push_str("# HELP automata_state_changes_total Number of state changes\n");
        output.push_str("# TYPE automata_state_changes_total counter\n");
        for ((from, to), count) in &families.state_changes {
            let _ = writeln!(
                output,
                "automata_state_changes_total{{from_state=\"{}\",to_state=\"{}\"}} {}",
                from, to, count
            );
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_gauge_moves_between_states() {
        let metrics = Metrics::new();
        metrics.add_current_state("Init", 1.0);
        metrics.add_current_state("Init", -1.0);
        metrics.add_current_state("Attempter", 1.0);

        assert_eq!(metrics.current_state("Init"), 0.0);
        assert_eq!(metrics.current_state("Attempter"), 1.0);
        assert_eq!(metrics.current_state("Leader"), 0.0);
    }

    #[test]
    fn test_render_histogram_is_cumulative() {
        let metrics = Metrics::new();
        metrics.observe_time_in_state("Attempter", 0.003);
        metrics.observe_time_in_state("Attempter", 0.2);
        metrics.observe_time_in_state("Attempter", 1000.0);

        let text = metrics.render();
        assert!(text.contains("automata_time_in_state_seconds_bucket{state=\"Attempter\",le=\"0.005\"} 1"));
        assert!(text.contains("automata_time_in_state_seconds_bucket{state=\"Attempter\",le=\"0.25\"} 2"));
        assert!(text.contains("automata_time_in_state_seconds_bucket{state=\"Attempter\",le=\"300\"} 2"));
        assert!(text.contains("automata_time_in_state_seconds_bucket{state=\"Attempter\",le=\"+Inf\"} 3"));
        assert!(text.contains("automata_time_in_state_seconds_count{state=\"Attempter\"} 3"));
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_state_change("Attempter", "Attempter");
                        let _ = metrics.render();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.state_changes("Attempter", "Attempter"), 8000);
    }
}
