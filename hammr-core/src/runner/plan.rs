use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use crate::context::Variables;
use crate::element::SampleListener;

use super::error::{Error, Result};
use super::group::{GroupHandle, GroupReport, PreparedGroup, StopHandle, ThreadGroup};
use super::signal::StopSignal;

/// Thread groups run together under one stop signal, with shared variables and listeners.
#[derive(Clone, Default)]
pub struct TestPlan {
    name: String,
    variables: Variables,
    groups: Vec<ThreadGroup>,
    listeners: Vec<Arc<dyn SampleListener>>,
    serialize_groups: bool,
}

impl std::fmt::Debug for TestPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPlan")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("serialize_groups", &self.serialize_groups)
            .finish_non_exhaustive()
    }
}

impl TestPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plan-level variables; a group's own variables override them.
    #[must_use]
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: ThreadGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Receives the samples of every group.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn SampleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Run groups one after another instead of all at once.
    #[must_use]
    pub fn serialize_groups(mut self, serialize: bool) -> Self {
        self.serialize_groups = serialize;
        self
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn groups(&self) -> &[ThreadGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [ThreadGroup] {
        &mut self.groups
    }

    /// Validates every group, then starts them. Nothing is started if any group is invalid.
    pub fn start(&self) -> Result<PlanHandle> {
        if self.groups.is_empty() {
            return Err(Error::EmptyPlan);
        }

        let prepared = self
            .groups
            .iter()
            .enumerate()
            .map(|(idx, group)| {
                let mut config = group.config()?;
                if !self.variables.is_empty() {
                    let mut vars = self.variables.clone();
                    vars.extend_from(&config.variables);
                    config.variables = Arc::new(vars);
                }
                Ok(group.prepare(idx + 1, config, &self.listeners))
            })
            .collect::<Result<Vec<_>>>()?;

        let stop = StopSignal::new();
        let started_at = Instant::now();
        info!(
            plan = %self.name,
            groups = prepared.len(),
            serialized = self.serialize_groups,
            "test plan started"
        );

        let driver = if self.serialize_groups {
            tokio::spawn(run_serialized(prepared, stop.clone()))
        } else {
            let handles: Vec<_> = prepared
                .into_iter()
                .map(|g| g.launch(stop.child(), stop.clone()))
                .collect();
            tokio::spawn(wait_all(handles))
        };

        Ok(PlanHandle {
            stop,
            driver,
            started_at,
        })
    }
}

async fn run_serialized(groups: Vec<PreparedGroup>, stop: Arc<StopSignal>) -> Result<Vec<GroupReport>> {
    let mut reports = Vec::with_capacity(groups.len());
    for group in groups {
        if stop.is_stopping() {
            break;
        }
        reports.push(group.launch(stop.child(), stop.clone()).wait().await?);
    }
    Ok(reports)
}

async fn wait_all(handles: Vec<GroupHandle>) -> Result<Vec<GroupReport>> {
    let mut reports = Vec::with_capacity(handles.len());
    let mut first_err = None;
    for handle in handles {
        match handle.wait().await {
            Ok(report) => reports.push(report),
            Err(err) => {
                first_err.get_or_insert(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(reports),
    }
}

/// A running test plan.
#[derive(Debug)]
pub struct PlanHandle {
    stop: Arc<StopSignal>,
    driver: JoinHandle<Result<Vec<GroupReport>>>,
    started_at: Instant,
}

impl PlanHandle {
    pub fn stopper(&self) -> StopHandle {
        StopHandle::new(self.stop.clone())
    }

    pub async fn stop(self) -> Result<PlanReport> {
        self.stop.stop();
        self.wait().await
    }

    pub async fn stop_now(self) -> Result<PlanReport> {
        self.stop.stop_now();
        self.wait().await
    }

    /// Waits until every group has finished.
    pub async fn wait(self) -> Result<PlanReport> {
        let groups = self.driver.await??;
        let report = PlanReport {
            groups,
            elapsed: self.started_at.elapsed(),
        };
        info!(
            samples = report.samples(),
            failed = report.failed_samples(),
            "test plan finished"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone)]
pub struct PlanReport {
    /// Reports of the groups that ran, in plan order.
    pub groups: Vec<GroupReport>,
    pub elapsed: Duration,
}

impl PlanReport {
    pub fn samples(&self) -> u64 {
        self.groups.iter().map(GroupReport::samples).sum()
    }

    pub fn failed_samples(&self) -> u64 {
        self.groups.iter().map(GroupReport::failed_samples).sum()
    }

    pub fn processor_errors(&self) -> u64 {
        self.groups.iter().map(GroupReport::processor_errors).sum()
    }
}
