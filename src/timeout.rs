//! Launch and run timeouts
//!
//! A run is bounded by two clocks:
//! - `launch`: how long to wait for the app to connect to the result listener
//! - `run`: overall wall-clock budget for the launched process
//!
//! Neither clock kills anything on its own. Callers poll a [`Deadline`] and
//! decide what to cancel.

use std::time::{Duration, Instant};

/// Upper bound for either timeout (24 hours)
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;

/// Timeouts governing a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTimeouts {
    /// Wait for the app to connect to the listener
    pub launch: Duration,
    /// Overall budget, multiplier already applied
    pub run: Duration,
}

impl RunTimeouts {
    pub fn new(launch: Duration, run: Duration) -> Self {
        Self { launch, run }
    }

    /// Build from configured minutes; `multiplier` scales the run timeout only.
    ///
    /// Non-finite or negative products collapse to zero and are rejected by
    /// [`RunTimeouts::validate`].
    pub fn from_minutes(launch_minutes: f64, run_minutes: f64, multiplier: f64) -> Self {
        Self {
            launch: minutes_to_duration(launch_minutes),
            run: minutes_to_duration(run_minutes * multiplier),
        }
    }

    /// Both timeouts must be in (0, 24h].
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        let max = Duration::from_secs(MAX_TIMEOUT_SECONDS);

        if self.run.is_zero() || self.run > max {
            return Err(TimeoutValidationError::RunOutOfBounds {
                value: self.run.as_secs_f64(),
            });
        }

        if self.launch.is_zero() || self.launch > max {
            return Err(TimeoutValidationError::LaunchOutOfBounds {
                value: self.launch.as_secs_f64(),
            });
        }

        Ok(())
    }
}

/// Minutes as a duration, clamped to zero or a generous upper bound.
pub fn minutes_to_duration(minutes: f64) -> Duration {
    let seconds = minutes * 60.0;
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds.min((MAX_TIMEOUT_SECONDS * 2) as f64))
    } else {
        Duration::ZERO
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("run timeout must be in (0, {MAX_TIMEOUT_SECONDS}] seconds, got {value}")]
    RunOutOfBounds { value: f64 },

    #[error("launch timeout must be in (0, {MAX_TIMEOUT_SECONDS}] seconds, got {value}")]
    LaunchOutOfBounds { value: f64 },
}

/// A point in time after which waiting stops.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_multiplier_scales_run_only() {
        let timeouts = RunTimeouts::from_minutes(2.0, 10.0, 1.5);
        assert_eq!(timeouts.launch, Duration::from_secs(120));
        assert_eq!(timeouts.run, Duration::from_secs(900));
        assert!(timeouts.validate().is_ok());
    }

    #[test]
    fn test_zero_run_rejected() {
        let timeouts = RunTimeouts::from_minutes(1.0, 10.0, 0.0);
        assert!(matches!(
            timeouts.validate(),
            Err(TimeoutValidationError::RunOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_negative_and_nan_collapse_to_zero() {
        let timeouts = RunTimeouts::from_minutes(f64::NAN, -5.0, 1.0);
        assert_eq!(timeouts.launch, Duration::ZERO);
        assert_eq!(timeouts.run, Duration::ZERO);
        assert!(timeouts.validate().is_err());
    }

    #[test]
    fn test_too_large_rejected() {
        let timeouts = RunTimeouts::new(Duration::from_secs(60), Duration::from_secs(86_401));
        assert!(matches!(
            timeouts.validate(),
            Err(TimeoutValidationError::RunOutOfBounds { .. })
        ));

        let timeouts = RunTimeouts::new(Duration::ZERO, Duration::from_secs(60));
        assert!(matches!(
            timeouts.validate(),
            Err(TimeoutValidationError::LaunchOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(20));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() <= Duration::from_millis(20));

        sleep(Duration::from_millis(40));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
