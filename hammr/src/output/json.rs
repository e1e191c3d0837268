use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use hammr_core::runner::{PlanReport, TestPlan};
use hammr_core::{LabelSummary, Summary};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _plan: &TestPlan) {}

    fn print_summary(&self, summary: &Summary, report: &PlanReport) -> anyhow::Result<()> {
        let line = build_summary_line(summary, report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub groups: Vec<JsonGroupSummary>,
    pub labels: &'a [LabelSummary],
    pub total: &'a LabelSummary,
    pub totals: JsonTotals,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonGroupSummary {
    pub group: String,
    pub threads_started: u64,
    pub threads_not_started: u64,
    pub iterations_total: u64,
    pub samples_total: u64,
    pub failed_samples_total: u64,
    pub processor_errors_total: u64,
    pub exits: BTreeMap<String, u64>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct JsonTotals {
    pub iterations_total: u64,
    pub samples_total: u64,
    pub failed_samples_total: u64,
    pub processor_errors_total: u64,
}

fn build_summary_line<'a>(summary: &'a Summary, report: &PlanReport) -> JsonSummaryLine<'a> {
    let mut totals = JsonTotals::default();
    let groups = report
        .groups
        .iter()
        .map(|g| {
            totals.iterations_total = totals.iterations_total.saturating_add(g.iterations());
            totals.samples_total = totals.samples_total.saturating_add(g.samples());
            totals.failed_samples_total = totals
                .failed_samples_total
                .saturating_add(g.failed_samples());
            totals.processor_errors_total = totals
                .processor_errors_total
                .saturating_add(g.processor_errors());

            let mut exits = BTreeMap::new();
            for t in &g.threads {
                *exits.entry(t.exit.to_string()).or_default() += 1;
            }

            JsonGroupSummary {
                group: g.name.to_string(),
                threads_started: g.threads.len() as u64,
                threads_not_started: g.not_started,
                iterations_total: g.iterations(),
                samples_total: g.samples(),
                failed_samples_total: g.failed_samples(),
                processor_errors_total: g.processor_errors(),
                exits,
                elapsed_secs: g.elapsed.as_secs_f64(),
            }
        })
        .collect::<Vec<_>>();

    JsonSummaryLine {
        kind: "summary",
        elapsed_secs: report.elapsed.as_secs_f64(),
        groups,
        labels: &summary.labels,
        total: &summary.total,
        totals,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
