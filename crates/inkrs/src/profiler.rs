//! Lightweight execution profiling: step counts and elapsed wall-clock time
//! across a run, toggled on demand by the host via `Story::start_profiling`.
//!
//! Grounded on `inkpy/runtime/profiler.py`, whose `end_profiling` never
//! actually assembled a report (a stub returning `None`); this one does.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A finished profiling run, returned by `Story::end_profiling`.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub total_steps: u64,
    pub elapsed: Duration,
    pub steps_per_control_command: HashMap<&'static str, u64>,
}

impl Report {
    pub fn steps_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_steps as f64 / secs
        }
    }
}

pub struct Profiler {
    started_at: Instant,
    total_steps: u64,
    suspended: bool,
    steps_per_control_command: HashMap<&'static str, u64>,
}

impl Profiler {
    pub fn new() -> Self {
        Self { started_at: Instant::now(), total_steps: 0, suspended: false, steps_per_control_command: HashMap::new() }
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn record_step(&mut self, label: &'static str) {
        if self.suspended {
            return;
        }
        self.total_steps += 1;
        *self.steps_per_control_command.entry(label).or_insert(0) += 1;
    }

    pub fn report(self) -> Report {
        Report {
            total_steps: self.total_steps,
            elapsed: self.started_at.elapsed(),
            steps_per_control_command: self.steps_per_control_command,
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}
