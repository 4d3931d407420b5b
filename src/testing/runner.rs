//! Test suite runner
//!
//! Runs every case of a suite through the probe pipeline in declaration
//! order. A failing case never stops the suite; all failures are collected
//! and reported together at the end.

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterApi;
use crate::common::config::Timeouts;
use crate::common::{CaseFailure, Error, Result};
use crate::probe::{
    assert_records, inject, resolve, wait_for_container, NameSource, RecordReader, TargetSelector,
};

use super::config::{TestCase, TestSuite};

/// Outcome of one test case
#[derive(Debug)]
pub struct CaseResult {
    pub description: String,
    pub error: Option<Error>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a whole suite run
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub results: Vec<CaseResult>,
    /// Cases left unrun after an interrupt
    pub skipped: usize,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    /// `Ok` only if every case ran and passed
    pub fn into_result(self) -> Result<()> {
        let skipped = self.skipped;
        let failures: Vec<CaseFailure> = self
            .results
            .into_iter()
            .filter_map(|r| {
                r.error.map(|error| CaseFailure {
                    description: r.description,
                    error,
                })
            })
            .collect();

        if !failures.is_empty() {
            Err(Error::SuiteFailed(failures))
        } else if skipped > 0 {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Shared inputs for every case of a run
pub struct RunContext<'a> {
    pub cluster: &'a dyn ClusterApi,
    pub names: &'a dyn NameSource,
    /// Image for cases that do not set their own
    pub image: &'a str,
    pub timeouts: &'a Timeouts,
    pub cancel: &'a CancellationToken,
}

/// Run every case in order and collect the outcomes
pub async fn run_suite(suite: &TestSuite, ctx: &RunContext<'_>) -> SuiteReport {
    let mut report = SuiteReport::default();
    let total = suite.test_cases.len();

    println!(
        "\n{} {} case(s)",
        "Running Test Suite:".blue().bold(),
        total.to_string().white().bold()
    );

    for (idx, case) in suite.test_cases.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            report.skipped = total - idx;
            break;
        }

        tracing::info!(description = %case.description, "Running test case");
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            outcome = run_case(case, ctx) => outcome,
        };

        match &outcome {
            Ok(()) => {
                tracing::info!(description = %case.description, "Passed");
                println!("  {} {}", "✓".green(), case.description);
            }
            Err(e) => {
                tracing::info!(description = %case.description, error = %e, "Failed");
                println!("  {} {}: {}", "✗".red(), case.description, e);
            }
        }

        report.results.push(CaseResult {
            description: case.description.clone(),
            error: outcome.err(),
        });
    }

    print_summary(&report);
    report
}

fn print_summary(report: &SuiteReport) {
    let passed = report.passed();
    let failed = report.failed();

    if failed == 0 && report.skipped == 0 {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            format!("All {} test case(s) passed", passed).green().bold()
        );
        return;
    }

    let mut summary = format!("{} passed, {} failed", passed, failed);
    if report.skipped > 0 {
        summary.push_str(&format!(", {} skipped", report.skipped));
    }
    println!("\n{} {}\n", "✗".red().bold(), summary.red().bold());
}

/// Run one case through the full pipeline
pub async fn run_case(case: &TestCase, ctx: &RunContext<'_>) -> Result<()> {
    let target = TargetSelector::try_from(&case.from)?;
    let resolved = resolve(ctx.cluster, &target).await?;

    let image = case.to.image.as_deref().unwrap_or(ctx.image);
    let handle = inject(ctx.cluster, ctx.names, &resolved, &case.to, image).await?;

    wait_for_container(ctx.cluster, &handle, ctx.timeouts.watch(), ctx.cancel).await?;

    let logs = ctx
        .cluster
        .pod_logs(
            &handle.namespace,
            &handle.pod_name,
            &handle.container_name,
            ctx.timeouts.log_since_secs,
        )
        .await?;
    let mut reader = RecordReader::new(logs);

    assert_records(
        &mut reader,
        case.expect.into(),
        ctx.timeouts.assert(),
        ctx.cancel,
    )
    .await
}
