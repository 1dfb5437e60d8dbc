use std::collections::BTreeMap;

use rowmill_common::RunResult;
use tracing::info;

/// Separator used by the published result summary. Width is part of the
/// contract; external tooling parses this block.
pub const SUMMARY_DASHES: &str = "-----------------------------------------------------";

/// Merge per-worker results into one logical result for the clustered run.
///
/// All numeric counters are cross-worker sums and overall success is the
/// logical AND of the per-worker success flags, so the merge is commutative
/// and associative over any grouping of workers.
pub fn merge(results: &BTreeMap<String, RunResult>) -> RunResult {
    let mut merged = RunResult::new();
    for result in results.values() {
        merged.absorb(result);
    }
    merged
}

/// Render the fixed-format summary block for a merged result.
///
/// Field order and labels are a published observability contract: Errors,
/// Input, Output, Updated, Read, Written, Rejected, framed by the dash
/// separator.
pub fn summary(pipeline_name: &str, result: &RunResult) -> String {
    let mut lines = Vec::with_capacity(11);
    lines.push(SUMMARY_DASHES.to_string());
    lines.push("Got result back from clustered transformation:".to_string());
    lines.push(format!("{pipeline_name}{SUMMARY_DASHES}"));
    lines.push(format!("{pipeline_name} Errors : {}", result.errors));
    lines.push(format!("{pipeline_name} Input : {}", result.lines_input));
    lines.push(format!("{pipeline_name} Output : {}", result.lines_output));
    lines.push(format!("{pipeline_name} Updated : {}", result.lines_updated));
    lines.push(format!("{pipeline_name} Read : {}", result.lines_read));
    lines.push(format!("{pipeline_name} Written : {}", result.lines_written));
    lines.push(format!(
        "{pipeline_name} Rejected : {}",
        result.lines_rejected
    ));
    lines.push(format!("{pipeline_name}{SUMMARY_DASHES}"));
    lines.join("\n")
}

/// Log the summary block line by line.
pub fn log_summary(pipeline_name: &str, result: &RunResult) {
    for line in summary(pipeline_name, result).lines() {
        info!("{line}");
    }
}
