use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::element::{Listeners, SampleListener};
use crate::pipeline::Pipeline;

use super::config::{ThreadGroupConfig, ThreadGroupOptions};
use super::error::{Error, Result};
use super::signal::StopSignal;
use super::vu::{ThreadReport, ThreadSpec, run_thread};

/// A pool of identical virtual threads sharing one pipeline template.
#[derive(Clone)]
pub struct ThreadGroup {
    name: Arc<str>,
    options: ThreadGroupOptions,
    pipeline: Arc<Pipeline>,
    listeners: Vec<Arc<dyn SampleListener>>,
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ThreadGroup {
    pub fn new(name: impl Into<Arc<str>>, options: ThreadGroupOptions, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            options,
            pipeline: Arc::new(pipeline),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn SampleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ThreadGroupOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ThreadGroupOptions {
        &mut self.options
    }

    /// Validates the options without starting anything.
    pub fn config(&self) -> Result<ThreadGroupConfig> {
        ThreadGroupConfig::from_options(&self.name, &self.options)
    }

    /// Validates the configuration and starts the ramp-up. Must be called from within a
    /// tokio runtime.
    ///
    /// A standalone group is its own test: `stop_test` actions stop just this group.
    pub fn start(&self) -> Result<GroupHandle> {
        let prepared = self.prepare(1, self.config()?, &[]);
        let stop = StopSignal::new();
        Ok(prepared.launch(stop.clone(), stop))
    }

    pub(crate) fn prepare(
        &self,
        group_num: usize,
        config: ThreadGroupConfig,
        extra_listeners: &[Arc<dyn SampleListener>],
    ) -> PreparedGroup {
        let listeners: Vec<_> = self
            .listeners
            .iter()
            .chain(extra_listeners)
            .cloned()
            .collect();
        PreparedGroup {
            name: self.name.clone(),
            group_num,
            config: Arc::new(config),
            pipeline: self.pipeline.clone(),
            listeners: Listeners::from(listeners),
        }
    }
}

/// A validated group, ready to launch.
pub(crate) struct PreparedGroup {
    name: Arc<str>,
    group_num: usize,
    config: Arc<ThreadGroupConfig>,
    pipeline: Arc<Pipeline>,
    listeners: Listeners,
}

impl PreparedGroup {
    pub(crate) fn launch(self, stop: Arc<StopSignal>, test_stop: Arc<StopSignal>) -> GroupHandle {
        let started_at = Instant::now();
        // A deadline past the end of representable time is never reached.
        let deadline = self
            .config
            .end_offset()
            .and_then(|o| started_at.checked_add(o));
        info!(
            group = %self.name,
            threads = self.config.threads,
            ramp_up = ?self.config.ramp_up,
            "thread group started"
        );

        let tasks = (0..self.config.threads)
            .map(|thread_num| {
                let start_at = started_at.checked_add(self.config.start_offset(thread_num));
                let spec = ThreadSpec {
                    group: self.name.clone(),
                    group_num: self.group_num,
                    thread_num,
                    config: self.config.clone(),
                    pipeline: self.pipeline.clone(),
                    listeners: self.listeners.clone(),
                    stop: stop.clone(),
                    test_stop: test_stop.clone(),
                    deadline,
                };
                tokio::spawn(start_thread(spec, start_at))
            })
            .collect();

        GroupHandle {
            name: self.name,
            stop,
            tasks,
            started_at,
        }
    }
}

/// Waits for the thread's start time, then runs it. Returns `None` when the thread never
/// started: stopped during ramp-up, or due to start after the scheduler deadline or at an
/// unreachable time.
async fn start_thread(spec: ThreadSpec, start_at: Option<Instant>) -> Option<ThreadReport> {
    let Some(start_at) = start_at else {
        debug!(
            group = %spec.group,
            thread_num = spec.thread_num,
            "start time is unreachable; not starting"
        );
        return None;
    };
    if spec.deadline.is_some_and(|d| start_at >= d) {
        debug!(
            group = %spec.group,
            thread_num = spec.thread_num,
            "start time is past the deadline; not starting"
        );
        return None;
    }

    tokio::select! {
        biased;
        () = spec.stop.stopped() => {
            debug!(group = %spec.group, thread_num = spec.thread_num, "stopped during ramp-up");
            return None;
        }
        () = tokio::time::sleep_until(start_at) => {}
    }

    Some(run_thread(spec).await)
}

/// Requests a stop of a running group (or plan) without owning its handle.
#[derive(Debug, Clone)]
pub struct StopHandle {
    signal: Arc<StopSignal>,
}

impl StopHandle {
    pub(crate) fn new(signal: Arc<StopSignal>) -> Self {
        Self { signal }
    }

    /// Threads finish their current iteration, then exit.
    pub fn stop(&self) {
        self.signal.stop();
    }

    /// Threads abandon in-flight samplers and exit.
    pub fn stop_now(&self) {
        self.signal.stop_now();
    }

    pub fn is_stopping(&self) -> bool {
        self.signal.is_stopping()
    }
}

/// A running thread group.
#[derive(Debug)]
pub struct GroupHandle {
    name: Arc<str>,
    stop: Arc<StopSignal>,
    tasks: Vec<JoinHandle<Option<ThreadReport>>>,
    started_at: Instant,
}

impl GroupHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stopper(&self) -> StopHandle {
        StopHandle::new(self.stop.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Requests a graceful stop and waits for every thread to finish.
    pub async fn stop(self) -> Result<GroupReport> {
        self.stop.stop();
        self.wait().await
    }

    /// Interrupts in-flight samplers and waits for every thread to finish.
    pub async fn stop_now(self) -> Result<GroupReport> {
        self.stop.stop_now();
        self.wait().await
    }

    /// Waits until every thread has terminated and run its finish hooks.
    pub async fn wait(self) -> Result<GroupReport> {
        let mut threads = Vec::with_capacity(self.tasks.len());
        let mut not_started = 0;
        let mut first_err = None;

        for task in self.tasks {
            match task.await {
                Ok(Some(report)) => threads.push(report),
                Ok(None) => not_started += 1,
                Err(err) => {
                    first_err.get_or_insert(Error::Join(err));
                }
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        let report = GroupReport {
            name: self.name,
            threads,
            not_started,
            elapsed: self.started_at.elapsed(),
        };
        info!(
            group = %report.name,
            threads = report.threads.len(),
            samples = report.samples(),
            failed = report.failed_samples(),
            "thread group finished"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone)]
pub struct GroupReport {
    pub name: Arc<str>,
    /// Reports of the threads that started, in thread order.
    pub threads: Vec<ThreadReport>,
    /// Threads cancelled during ramp-up or scheduled past the deadline.
    pub not_started: u64,
    pub elapsed: Duration,
}

impl GroupReport {
    pub fn iterations(&self) -> u64 {
        self.threads.iter().map(|t| t.iterations).sum()
    }

    pub fn samples(&self) -> u64 {
        self.threads.iter().map(|t| t.samples).sum()
    }

    pub fn failed_samples(&self) -> u64 {
        self.threads.iter().map(|t| t.failed_samples).sum()
    }

    pub fn processor_errors(&self) -> u64 {
        self.threads.iter().map(|t| t.processor_errors).sum()
    }
}
