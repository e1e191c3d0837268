use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::context::{ThreadAction, Variables};

use super::error::{Error, Result};

/// What a thread does after a sample fails.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::EnumString, strum::Display,
)]
pub enum OnSampleError {
    /// Keep going: post-processors run against the failed result.
    #[default]
    #[strum(to_string = "continue")]
    Continue,

    /// Skip the post-processors and start the next iteration.
    #[strum(
        to_string = "start_next_loop",
        serialize = "start-next-loop",
        serialize = "startnextloop"
    )]
    StartNextLoop,

    #[strum(
        to_string = "stop_thread",
        serialize = "stop-thread",
        serialize = "stopthread"
    )]
    StopThread,

    #[strum(to_string = "stop_test", serialize = "stop-test", serialize = "stoptest")]
    StopTest,

    #[strum(
        to_string = "stop_test_now",
        serialize = "stop-test-now",
        serialize = "stoptestnow"
    )]
    StopTestNow,
}

impl OnSampleError {
    /// The thread action a failed sample triggers under this policy.
    #[must_use]
    pub fn action(self) -> Option<ThreadAction> {
        match self {
            Self::Continue => None,
            Self::StartNextLoop => Some(ThreadAction::StartNextLoop),
            Self::StopThread => Some(ThreadAction::StopThread),
            Self::StopTest => Some(ThreadAction::StopTest),
            Self::StopTestNow => Some(ThreadAction::StopTestNow),
        }
    }
}

/// Thread group settings as they come from a plan file or CLI flags, before validation.
///
/// Counts are signed so that negative values reach [`ThreadGroupConfig::from_options`] and are
/// reported there.
#[derive(Debug, Clone)]
pub struct ThreadGroupOptions {
    pub threads: i64,
    pub ramp_up: Duration,

    /// Iterations per thread; `-1` runs until stopped. Ignored in scheduler mode.
    pub loops: i64,

    /// When set, threads run until `duration` elapses instead of counting loops.
    pub scheduler: bool,
    pub duration: Option<Duration>,
    /// Wait before the first thread starts (scheduler mode only).
    pub startup_delay: Option<Duration>,

    pub on_sample_error: OnSampleError,

    /// When false, every iteration starts from the seeded variables again.
    pub same_user_on_next_iteration: bool,

    /// Seed variables copied into every thread's context.
    pub variables: Variables,
}

impl Default for ThreadGroupOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            ramp_up: Duration::ZERO,
            loops: 1,
            scheduler: false,
            duration: None,
            startup_delay: None,
            on_sample_error: OnSampleError::Continue,
            same_user_on_next_iteration: true,
            variables: Variables::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Finite(u64),
    Forever,
}

impl LoopCount {
    pub fn from_raw(loops: i64) -> Option<Self> {
        match loops {
            -1 => Some(Self::Forever),
            n => u64::try_from(n).ok().map(Self::Finite),
        }
    }

    /// Whether `completed` iterations exhaust the count.
    pub fn is_exhausted(self, completed: u64) -> bool {
        match self {
            Self::Finite(n) => completed >= n,
            Self::Forever => false,
        }
    }
}

/// The single condition that ends a thread on its own (besides stop requests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    Loops(LoopCount),
    Scheduled {
        startup_delay: Duration,
        duration: Duration,
    },
}

/// Validated thread group configuration; immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct ThreadGroupConfig {
    pub threads: u64,
    pub ramp_up: Duration,
    pub stop_condition: StopCondition,
    pub on_sample_error: OnSampleError,
    pub same_user_on_next_iteration: bool,
    pub variables: Arc<Variables>,
}

impl ThreadGroupConfig {
    pub fn from_options(group: &str, opts: &ThreadGroupOptions) -> Result<Self> {
        let threads = u64::try_from(opts.threads).map_err(|_| Error::InvalidThreads {
            group: group.to_string(),
            value: opts.threads,
        })?;

        let stop_condition = if opts.scheduler {
            let duration = opts
                .duration
                .filter(|d| !d.is_zero())
                .ok_or_else(|| Error::MissingDuration(group.to_string()))?;
            StopCondition::Scheduled {
                startup_delay: opts.startup_delay.unwrap_or(Duration::ZERO),
                duration,
            }
        } else {
            let loops = LoopCount::from_raw(opts.loops).ok_or_else(|| Error::InvalidLoops {
                group: group.to_string(),
                value: opts.loops,
            })?;
            StopCondition::Loops(loops)
        };

        let config = Self {
            threads,
            ramp_up: opts.ramp_up,
            stop_condition,
            on_sample_error: opts.on_sample_error,
            same_user_on_next_iteration: opts.same_user_on_next_iteration,
            variables: Arc::new(opts.variables.clone()),
        };
        if config.horizon().and_then(|h| Instant::now().checked_add(h)).is_none() {
            return Err(Error::DurationOverflow(group.to_string()));
        }
        Ok(config)
    }

    /// Latest offset from group start the group schedules anything at.
    fn horizon(&self) -> Option<Duration> {
        let scheduled = match self.stop_condition {
            StopCondition::Scheduled { duration, .. } => duration,
            StopCondition::Loops(_) => Duration::ZERO,
        };
        self.startup_delay()
            .checked_add(self.ramp_up)?
            .checked_add(scheduled)
    }

    pub fn startup_delay(&self) -> Duration {
        match self.stop_condition {
            StopCondition::Scheduled { startup_delay, .. } => startup_delay,
            StopCondition::Loops(_) => Duration::ZERO,
        }
    }

    /// Offset from group start at which thread `thread_num` (0-based) starts: threads are
    /// spread evenly over the ramp-up period, after the startup delay.
    pub fn start_offset(&self, thread_num: u64) -> Duration {
        let ramp = if self.threads <= 1 || self.ramp_up.is_zero() {
            Duration::ZERO
        } else {
            let nanos = self.ramp_up.as_nanos() * u128::from(thread_num) / u128::from(self.threads);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        self.startup_delay().saturating_add(ramp)
    }

    /// Offset from group start after which no new iteration may begin.
    pub fn end_offset(&self) -> Option<Duration> {
        match self.stop_condition {
            StopCondition::Scheduled {
                startup_delay,
                duration,
            } => Some(startup_delay.saturating_add(duration)),
            StopCondition::Loops(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(opts: ThreadGroupOptions) -> ThreadGroupConfig {
        ThreadGroupConfig::from_options("g", &opts)
            .unwrap_or_else(|e| panic!("expected valid config: {e}"))
    }

    #[test]
    fn defaults_run_one_loop_without_scheduler() {
        let cfg = config(ThreadGroupOptions::default());
        assert_eq!(cfg.threads, 1);
        assert_eq!(
            cfg.stop_condition,
            StopCondition::Loops(LoopCount::Finite(1))
        );
        assert_eq!(cfg.on_sample_error, OnSampleError::Continue);
        assert!(cfg.same_user_on_next_iteration);
    }

    #[test]
    fn negative_threads_are_rejected() {
        let opts = ThreadGroupOptions {
            threads: -1,
            ..ThreadGroupOptions::default()
        };
        let err = ThreadGroupConfig::from_options("g", &opts);
        assert!(matches!(err, Err(Error::InvalidThreads { value: -1, .. })));
    }

    #[test]
    fn loops_below_minus_one_are_rejected() {
        let opts = ThreadGroupOptions {
            loops: -2,
            ..ThreadGroupOptions::default()
        };
        assert!(matches!(
            ThreadGroupConfig::from_options("g", &opts),
            Err(Error::InvalidLoops { value: -2, .. })
        ));
    }

    #[test]
    fn scheduler_requires_positive_duration_and_ignores_loops() {
        let missing = ThreadGroupOptions {
            scheduler: true,
            ..ThreadGroupOptions::default()
        };
        assert!(matches!(
            ThreadGroupConfig::from_options("g", &missing),
            Err(Error::MissingDuration(_))
        ));

        let cfg = config(ThreadGroupOptions {
            scheduler: true,
            loops: -5,
            duration: Some(Duration::from_secs(3)),
            startup_delay: Some(Duration::from_secs(1)),
            ..ThreadGroupOptions::default()
        });
        assert_eq!(
            cfg.stop_condition,
            StopCondition::Scheduled {
                startup_delay: Duration::from_secs(1),
                duration: Duration::from_secs(3),
            }
        );
        assert_eq!(cfg.end_offset(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn unreachable_schedules_are_rejected() {
        let huge_duration = ThreadGroupOptions {
            scheduler: true,
            duration: Some(Duration::from_secs(u64::MAX)),
            ..ThreadGroupOptions::default()
        };
        assert!(matches!(
            ThreadGroupConfig::from_options("g", &huge_duration),
            Err(Error::DurationOverflow(_))
        ));

        let huge_ramp_up = ThreadGroupOptions {
            threads: 2,
            ramp_up: Duration::from_secs(u64::MAX / 2),
            scheduler: true,
            duration: Some(Duration::from_secs(u64::MAX / 2)),
            startup_delay: Some(Duration::from_secs(u64::MAX / 2)),
            ..ThreadGroupOptions::default()
        };
        assert!(matches!(
            ThreadGroupConfig::from_options("g", &huge_ramp_up),
            Err(Error::DurationOverflow(_))
        ));

        let year = Duration::from_secs(365 * 24 * 3600);
        config(ThreadGroupOptions {
            ramp_up: year,
            scheduler: true,
            duration: Some(year),
            ..ThreadGroupOptions::default()
        });
    }

    #[test]
    fn start_offsets_spread_evenly_over_ramp_up() {
        let cfg = config(ThreadGroupOptions {
            threads: 4,
            ramp_up: Duration::from_secs(2),
            ..ThreadGroupOptions::default()
        });
        let offsets: Vec<_> = (0..4).map(|i| cfg.start_offset(i)).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500),
            ]
        );
    }

    #[test]
    fn zero_ramp_up_starts_everything_at_the_startup_delay() {
        let cfg = config(ThreadGroupOptions {
            threads: 3,
            scheduler: true,
            duration: Some(Duration::from_secs(1)),
            startup_delay: Some(Duration::from_millis(200)),
            ..ThreadGroupOptions::default()
        });
        assert!((0..3).all(|i| cfg.start_offset(i) == Duration::from_millis(200)));
    }

    #[test]
    fn on_sample_error_parses_aliases() {
        assert_eq!(
            "startnextloop".parse::<OnSampleError>().ok(),
            Some(OnSampleError::StartNextLoop)
        );
        assert_eq!(
            "stop-test-now".parse::<OnSampleError>().ok(),
            Some(OnSampleError::StopTestNow)
        );
        assert_eq!(OnSampleError::StopThread.to_string(), "stop_thread");
        assert!("explode".parse::<OnSampleError>().is_err());
    }

    #[test]
    fn loop_count_exhaustion() {
        assert!(LoopCount::Finite(0).is_exhausted(0));
        assert!(!LoopCount::Finite(2).is_exhausted(1));
        assert!(!LoopCount::Forever.is_exhausted(u64::MAX));
        assert_eq!(LoopCount::from_raw(-2), None);
    }
}
