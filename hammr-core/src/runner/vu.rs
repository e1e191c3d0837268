use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::context::{ThreadAction, ThreadContext};
use crate::element::{Listeners, SampleEvent};
use crate::pipeline::{Pipeline, ThreadPipeline};

use super::config::{StopCondition, ThreadGroupConfig};
use super::signal::StopSignal;

/// Why a thread stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ThreadExit {
    /// The loop count was exhausted.
    Completed,
    /// The scheduler duration elapsed.
    Deadline,
    /// A stop was requested (by the caller or by a `stop_test` action).
    Stopped,
    /// A stop-now request interrupted the in-flight sampler.
    Interrupted,
    /// An element or the on-sample-error policy asked this thread to stop.
    StopThread,
    /// An element failed fatally.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReport {
    pub thread_name: Arc<str>,
    pub thread_num: u64,
    pub iterations: u64,
    pub samples: u64,
    pub failed_samples: u64,
    pub processor_errors: u64,
    pub exit: ThreadExit,
}

pub(crate) struct ThreadSpec {
    pub group: Arc<str>,
    pub group_num: usize,
    pub thread_num: u64,
    pub config: Arc<ThreadGroupConfig>,
    pub pipeline: Arc<Pipeline>,
    pub listeners: Listeners,
    /// The group's signal; checked before every iteration.
    pub stop: Arc<StopSignal>,
    /// Raised by `stop_test` / `stop_test_now` actions.
    pub test_stop: Arc<StopSignal>,
    pub deadline: Option<Instant>,
}

/// Owns a thread's elements and context; runs the finish hooks exactly once, on drop at
/// the latest, so an aborted or panicking task still reports its thread as finished.
struct ThreadGuard {
    pipeline: ThreadPipeline,
    ctx: ThreadContext,
    finished: bool,
}

impl ThreadGuard {
    fn finish(&mut self) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        self.pipeline.thread_finished(&self.ctx);
        info!(thread = self.ctx.thread_name(), "thread finished");
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

pub(crate) async fn run_thread(spec: ThreadSpec) -> ThreadReport {
    let ctx = ThreadContext::new(
        spec.group.clone(),
        spec.group_num,
        spec.thread_num,
        spec.config.variables.clone(),
        spec.stop.clone(),
    );
    let mut guard = ThreadGuard {
        pipeline: spec.pipeline.instantiate(),
        ctx,
        finished: false,
    };
    let mut report = ThreadReport {
        thread_name: guard.ctx.thread_name_arc(),
        thread_num: spec.thread_num,
        iterations: 0,
        samples: 0,
        failed_samples: 0,
        processor_errors: 0,
        exit: ThreadExit::Completed,
    };

    info!(thread = %report.thread_name, "thread started");
    if guard.pipeline.thread_started(&mut guard.ctx).is_err() {
        report.exit = ThreadExit::Fatal;
        guard.finish();
        return report;
    }

    let reset_variables = !spec.config.same_user_on_next_iteration;
    report.exit = loop {
        if spec.stop.is_stopping() {
            break ThreadExit::Stopped;
        }
        if spec.deadline.is_some_and(|d| Instant::now() >= d) {
            break ThreadExit::Deadline;
        }
        if let StopCondition::Loops(loops) = spec.config.stop_condition
            && loops.is_exhausted(report.iterations)
        {
            break ThreadExit::Completed;
        }

        guard
            .ctx
            .begin_iteration(report.iterations, reset_variables && report.iterations > 0);
        let outcome = guard
            .pipeline
            .run_iteration(&mut guard.ctx, spec.config.on_sample_error)
            .await;
        report.iterations += 1;
        report.processor_errors += outcome.processor_errors;

        if let Some(result) = outcome.result {
            report.samples += 1;
            if !result.is_success() {
                report.failed_samples += 1;
                if let Some(action) = spec.config.on_sample_error.action() {
                    guard.ctx.request(action);
                }
            }
            let event = SampleEvent {
                group: spec.group.clone(),
                thread_name: report.thread_name.clone(),
                thread_num: spec.thread_num,
                iteration: guard.ctx.iteration(),
                result,
            };
            for listener in spec.listeners.iter() {
                listener.sample_occurred(&event);
            }
        }

        if outcome.interrupted {
            break ThreadExit::Interrupted;
        }
        if outcome.fatal.is_some() {
            break ThreadExit::Fatal;
        }
        match guard.ctx.take_action() {
            None | Some(ThreadAction::StartNextLoop) => {}
            Some(ThreadAction::StopThread) => break ThreadExit::StopThread,
            Some(ThreadAction::StopTest) => {
                debug!(thread = %report.thread_name, "stop_test requested");
                spec.test_stop.stop();
                break ThreadExit::Stopped;
            }
            Some(ThreadAction::StopTestNow) => {
                debug!(thread = %report.thread_name, "stop_test_now requested");
                spec.test_stop.stop_now();
                break ThreadExit::Stopped;
            }
        }

        // A sampler that never awaits would otherwise starve a current-thread runtime.
        tokio::task::yield_now().await;
    };

    debug!(
        thread = %report.thread_name,
        exit = %report.exit,
        iterations = report.iterations,
        "thread loop ended"
    );
    guard.finish();
    report
}
