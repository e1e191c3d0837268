use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use hammr_core::runner::{GroupReport, PlanReport, StopCondition, TestPlan};
use hammr_core::{LabelSummary, Summary};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, plan: &TestPlan) {
        print!("{}", render_header(plan_path, plan));
    }

    fn print_summary(&self, summary: &Summary, report: &PlanReport) -> anyhow::Result<()> {
        print!("{}", render_summary(summary, report));
        Ok(())
    }
}

fn render_header(plan_path: &Path, plan: &TestPlan) -> String {
    let mut out = String::new();
    writeln!(out, "plan: {} ({})", plan.name(), plan_path.display()).ok();
    for group in plan.groups() {
        match group.config() {
            Ok(cfg) => {
                let stop = match cfg.stop_condition {
                    StopCondition::Loops(loops) => format!("loops={loops:?}"),
                    StopCondition::Scheduled {
                        startup_delay,
                        duration,
                    } => format!(
                        "delay={} duration={}",
                        format_duration(startup_delay),
                        format_duration(duration)
                    ),
                };
                writeln!(
                    out,
                    "group: {} threads={} ramp_up={} {stop} on_sample_error={}",
                    group.name(),
                    cfg.threads,
                    format_duration(cfg.ramp_up),
                    cfg.on_sample_error
                )
                .ok();
            }
            Err(err) => {
                writeln!(out, "group: {} (invalid: {err})", group.name()).ok();
            }
        }
    }
    out.push('\n');
    out
}

fn render_summary(summary: &Summary, report: &PlanReport) -> String {
    let mut out = String::new();
    out.push_str("summary\n");

    for group in &report.groups {
        render_group(group, &mut out);
    }

    if summary.labels.is_empty() {
        out.push_str("samples: none\n");
    } else {
        writeln!(
            out,
            "{:<32} {:>8} {:>7} {:>9} {:>9} {:>9} {:>9} {:>9} {:>10}",
            "label", "samples", "err%", "mean", "p50", "p90", "p99", "max", "rate"
        )
        .ok();
        for label in &summary.labels {
            render_label(label, &mut out);
        }
        render_label(&summary.total, &mut out);
    }

    writeln!(
        out,
        "\nelapsed: {} samples: {} failed: {} processor_errors: {}",
        format_duration(report.elapsed),
        report.samples(),
        report.failed_samples(),
        report.processor_errors()
    )
    .ok();
    out
}

fn render_group(group: &GroupReport, out: &mut String) {
    writeln!(out, "group: {}", group.name).ok();
    writeln!(
        out,
        "  threads: {} started, {} not started",
        group.threads.len(),
        group.not_started
    )
    .ok();
    writeln!(
        out,
        "  iterations: {} samples: {} (failed {})",
        group.iterations(),
        group.samples(),
        group.failed_samples()
    )
    .ok();
    if group.processor_errors() > 0 {
        writeln!(out, "  processor_errors: {}", group.processor_errors()).ok();
    }

    let mut exits: BTreeMap<String, u64> = BTreeMap::new();
    for t in &group.threads {
        *exits.entry(t.exit.to_string()).or_default() += 1;
    }
    if !exits.is_empty() {
        let inner = exits
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "  exits: {inner}").ok();
    }
    writeln!(out, "  elapsed: {}", format_duration(group.elapsed)).ok();
    out.push('\n');
}

fn render_label(l: &LabelSummary, out: &mut String) {
    writeln!(
        out,
        "{:<32} {:>8} {:>6.2}% {:>9} {:>9} {:>9} {:>9} {:>9} {:>10}",
        truncate(&l.label, 32),
        l.samples,
        l.error_rate * 100.0,
        format_ms_opt(l.mean_ms),
        format_ms_opt(l.p50_ms),
        format_ms_opt(l.p90_ms),
        format_ms_opt(l.p99_ms),
        format_ms_opt(l.max_ms),
        l.throughput_per_sec
            .map(|r| format!("{r:.1}/s"))
            .unwrap_or_else(|| "-".to_string()),
    )
    .ok();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
    t.push('~');
    t
}

fn format_ms_opt(ms: Option<f64>) -> String {
    match ms {
        Some(v) if v.is_finite() && v >= 1000.0 => format!("{:.2}s", v / 1000.0),
        Some(v) if v.is_finite() => format!("{v:.2}ms"),
        _ => "-".to_string(),
    }
}

fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms >= 1000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        format!("{ms}ms")
    }
}
