//! Step Clock & Cognitive Load
//!
//! Monotonic wall-to-wall timing for steps plus the load window the fatigue
//! rule feeds on. Load is the fraction of steps in the last full cycle that
//! produced a non-empty thought.

use std::time::{Duration, Instant};

use crate::core::types::STEPS_PER_CYCLE;

/// Monotonic step clock with rolling productivity window
#[derive(Debug)]
pub struct StepClock {
    started: Instant,
    step_count: u64,
    total_step_time: Duration,
    /// One flag per step of the trailing cycle: did it produce a thought
    productivity: [bool; STEPS_PER_CYCLE as usize],
    productivity_cursor: usize,
}

impl StepClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            step_count: 0,
            total_step_time: Duration::ZERO,
            productivity: [false; STEPS_PER_CYCLE as usize],
            productivity_cursor: 0,
        }
    }

    /// Begin timing a step
    #[must_use]
    pub fn start_step(&self) -> Instant {
        Instant::now()
    }

    /// Record a finished step: its duration and whether it produced thoughts
    pub fn record_step(&mut self, elapsed: Duration, produced: bool) {
        self.step_count += 1;
        self.total_step_time += elapsed;
        self.productivity[self.productivity_cursor] = produced;
        self.productivity_cursor = (self.productivity_cursor + 1) % self.productivity.len();
    }

    /// Fraction of the trailing cycle's steps that produced a thought
    #[must_use]
    pub fn load(&self) -> f32 {
        let window = if self.step_count < u64::from(STEPS_PER_CYCLE) {
            // Partial window during the first cycle
            self.step_count.max(1) as usize
        } else {
            self.productivity.len()
        };
        let productive = self.productivity.iter().filter(|p| **p).count();
        productive as f32 / window as f32
    }

    /// Total steps recorded
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Average wall-to-wall step duration
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn average_step_duration(&self) -> Duration {
        if self.step_count == 0 {
            Duration::ZERO
        } else {
            self.total_step_time / self.step_count as u32
        }
    }

    /// Time since the clock was created
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for StepClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_clock_reports_zero() {
        let clock = StepClock::new();
        assert_eq!(clock.step_count(), 0);
        assert_eq!(clock.average_step_duration(), Duration::ZERO);
        assert_eq!(clock.load(), 0.0);
    }

    #[test]
    fn average_over_recorded_steps() {
        let mut clock = StepClock::new();
        clock.record_step(Duration::from_millis(10), true);
        clock.record_step(Duration::from_millis(30), true);
        assert_eq!(clock.average_step_duration(), Duration::from_millis(20));
        assert_eq!(clock.step_count(), 2);
    }

    #[test]
    fn start_step_mark_feeds_the_average() {
        let mut clock = StepClock::new();
        let started = clock.start_step();
        std::thread::sleep(Duration::from_millis(5));
        clock.record_step(started.elapsed(), true);
        assert_eq!(clock.step_count(), 1);
        assert!(clock.average_step_duration() >= Duration::from_millis(5));
    }

    #[test]
    fn load_is_productive_fraction() {
        let mut clock = StepClock::new();
        for i in 0..12 {
            clock.record_step(Duration::from_millis(1), i % 2 == 0);
        }
        assert!((clock.load() - 0.5).abs() < 0.01);
    }

    #[test]
    fn load_window_rolls_over() {
        let mut clock = StepClock::new();
        // A fully productive cycle...
        for _ in 0..12 {
            clock.record_step(Duration::from_millis(1), true);
        }
        assert!((clock.load() - 1.0).abs() < 0.01);
        // ...then a fully idle one pushes load back to zero
        for _ in 0..12 {
            clock.record_step(Duration::from_millis(1), false);
        }
        assert!(clock.load() < 0.01);
    }

    #[test]
    fn partial_first_cycle_uses_partial_window() {
        let mut clock = StepClock::new();
        clock.record_step(Duration::from_millis(1), true);
        clock.record_step(Duration::from_millis(1), true);
        clock.record_step(Duration::from_millis(1), false);
        assert!((clock.load() - 2.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn uptime_increases() {
        let clock = StepClock::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.uptime() >= Duration::from_millis(5));
    }
}
