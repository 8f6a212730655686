//! Console rendering of run, suite, and batch results.

use waypoint_engine::{BatchReport, RunOutcome, RunStatus};
use waypoint_harness::SuiteReport;

pub fn print_run_outcome(outcome: &RunOutcome) {
    match outcome.status {
        RunStatus::Completed => println!("\nrun {} completed", outcome.run_id),
        RunStatus::Cancelled => println!("\nrun {} cancelled", outcome.run_id),
    }
    if !outcome.vars.is_empty() {
        println!("variables:");
        for (name, value) in &outcome.vars {
            let text = waypoint_engine::render::display_value(value);
            let summary: String = text.chars().take(96).collect();
            if summary.len() < text.len() {
                println!("  {name} = {summary}…");
            } else {
                println!("  {name} = {summary}");
            }
        }
    }
    println!("visited: {}", outcome.history.join(" -> "));
}

pub fn print_suite(suite: &SuiteReport) {
    println!("workflow under test: {}", suite.workflow);
    for aggregated in &suite.scenarios {
        let verdict = if aggregated.all_passed() { "pass" } else { "FAIL" };
        println!(
            "  [{verdict}] {} ({}/{} iterations passed, min {:?} / avg {:?} / max {:?})",
            aggregated.name,
            aggregated.passed,
            aggregated.iterations,
            aggregated.min_duration,
            aggregated.avg_duration,
            aggregated.max_duration,
        );
        for result in &aggregated.results {
            if let Some(error) = &result.error {
                println!("      error: {error}");
            }
            for assertion in &result.assertions {
                if !assertion.passed {
                    let detail = assertion.detail.as_deref().unwrap_or("failed");
                    println!("      assertion '{}': {detail}", assertion.description);
                }
            }
        }
    }
    let (passed, failed) = suite.totals();
    println!("totals: {passed} passed, {failed} failed");
}

pub fn print_batch(report: &BatchReport) {
    if let Some(name) = &report.name {
        println!("batch: {name}");
    }
    for run in &report.runs {
        let status = match run.status {
            waypoint_engine::BatchRunStatus::Completed => "completed",
            waypoint_engine::BatchRunStatus::Cancelled => "cancelled",
            waypoint_engine::BatchRunStatus::Failed => "FAILED",
        };
        match &run.error {
            Some(error) => println!(
                "  [{status}] {} ({:?}): {error}",
                run.workflow, run.duration
            ),
            None => println!("  [{status}] {} ({:?})", run.workflow, run.duration),
        }
    }
}
