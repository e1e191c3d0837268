use anyhow::Context as _;
use std::sync::Arc;

use hammr_core::Summariser;
use hammr_core::runner::{StopHandle, TestPlan};
use tracing::warn;

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan_yaml;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let mut plan = plan_yaml::load_plan(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;
    apply_overrides(&mut plan, &args).map_err(RunError::InvalidInput)?;

    let summariser = Arc::new(Summariser::new());
    let plan = plan.with_listener(summariser.clone());

    out.print_header(&args.plan, &plan);

    let handle = plan.start()?;

    let watcher = tokio::spawn(watch_ctrl_c(handle.stopper()));
    let report = handle.wait().await;
    watcher.abort();
    let report = report?;

    out.print_summary(&summariser.snapshot(), &report)
        .context("failed to print summary")
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_failed_samples(report.failed_samples()))
}

/// CLI flags win over every group's plan settings.
fn apply_overrides(plan: &mut TestPlan, args: &RunArgs) -> anyhow::Result<()> {
    let threads = args
        .threads
        .map(i64::try_from)
        .transpose()
        .context("--threads is too large")?;

    for group in plan.groups_mut() {
        let opts = group.options_mut();
        if let Some(threads) = threads {
            opts.threads = threads;
        }
        if let Some(ramp_up) = args.ramp_up {
            opts.ramp_up = ramp_up;
        }
        if let Some(loops) = args.loops {
            opts.loops = loops;
        }
        if let Some(duration) = args.duration {
            opts.scheduler = true;
            opts.duration = Some(duration);
        }
    }
    Ok(())
}

/// First Ctrl-C stops after the current iterations; the second interrupts in-flight samplers.
async fn watch_ctrl_c(stopper: StopHandle) {
    loop {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            return;
        }
        if stopper.is_stopping() {
            warn!("interrupting in-flight samples");
            stopper.stop_now();
            return;
        }
        warn!("stopping after current iterations (press Ctrl-C again to interrupt)");
        stopper.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use hammr_core::Pipeline;
    use hammr_core::elements::DummySampler;
    use hammr_core::runner::{ThreadGroup, ThreadGroupOptions};
    use std::path::PathBuf;
    use std::time::Duration;

    fn args() -> RunArgs {
        RunArgs {
            plan: PathBuf::from("plan.yaml"),
            threads: None,
            ramp_up: None,
            loops: None,
            duration: None,
            output: OutputFormat::HumanReadable,
        }
    }

    fn plan() -> TestPlan {
        let group = |name: &str| {
            ThreadGroup::new(
                name,
                ThreadGroupOptions {
                    threads: 2,
                    loops: 5,
                    ..ThreadGroupOptions::default()
                },
                Pipeline::builder(DummySampler::new(name)).build(),
            )
        };
        TestPlan::new("p").with_group(group("a")).with_group(group("b"))
    }

    #[test]
    fn no_flags_keep_plan_settings() {
        let mut plan = plan();
        if let Err(err) = apply_overrides(&mut plan, &args()) {
            panic!("overrides failed: {err}");
        }
        for g in plan.groups() {
            assert_eq!(g.options().threads, 2);
            assert_eq!(g.options().loops, 5);
            assert!(!g.options().scheduler);
        }
    }

    #[test]
    fn flags_override_every_group() {
        let mut plan = plan();
        let args = RunArgs {
            threads: Some(7),
            ramp_up: Some(Duration::from_secs(3)),
            loops: Some(-1),
            duration: Some(Duration::from_secs(30)),
            ..args()
        };
        if let Err(err) = apply_overrides(&mut plan, &args) {
            panic!("overrides failed: {err}");
        }
        for g in plan.groups() {
            let o = g.options();
            assert_eq!(o.threads, 7);
            assert_eq!(o.ramp_up, Duration::from_secs(3));
            assert_eq!(o.loops, -1);
            assert!(o.scheduler);
            assert_eq!(o.duration, Some(Duration::from_secs(30)));
        }
    }

    #[test]
    fn huge_thread_count_is_rejected() {
        let mut plan = plan();
        let args = RunArgs {
            threads: Some(u64::MAX),
            ..args()
        };
        assert!(apply_overrides(&mut plan, &args).is_err());
    }
}
