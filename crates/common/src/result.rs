use serde::{Deserialize, Serialize};

/// Accumulated outcome of one pipeline execution attempt.
///
/// Each sub-run owns its `RunResult` exclusively until all workers are
/// terminal and the aggregator merges them; counters are commutative sums so
/// merge order never matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Number of step errors observed during the run.
    pub errors: u64,
    /// Rows read from external inputs (files, databases).
    pub lines_input: u64,
    /// Rows written to external outputs.
    pub lines_output: u64,
    /// Rows read from preceding steps.
    pub lines_read: u64,
    /// Rows written to following steps.
    pub lines_written: u64,
    /// Rows updated in external outputs.
    pub lines_updated: u64,
    /// Rows rejected by filtering/validation steps.
    pub lines_rejected: u64,
    /// Whether the run completed successfully.
    pub success: bool,
    /// Free-form log excerpt attached to the result.
    pub log_text: String,
}

impl RunResult {
    /// Fresh result for a new execution attempt.
    pub fn new() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Fold another result into this one: counters are summed, success is
    /// the logical AND, log excerpts are concatenated.
    pub fn absorb(&mut self, other: &RunResult) {
        self.errors += other.errors;
        self.lines_input += other.lines_input;
        self.lines_output += other.lines_output;
        self.lines_read += other.lines_read;
        self.lines_written += other.lines_written;
        self.lines_updated += other.lines_updated;
        self.lines_rejected += other.lines_rejected;
        self.success = self.success && other.success;
        if !other.log_text.is_empty() {
            if !self.log_text.is_empty() {
                self.log_text.push('\n');
            }
            self.log_text.push_str(&other.log_text);
        }
    }

    /// Mark the result failed and bump the error counter.
    pub fn record_error(&mut self) {
        self.errors += 1;
        self.success = false;
    }
}

#[cfg(test)]
mod tests {
    use super::RunResult;

    fn result(errors: u64, input: u64, success: bool) -> RunResult {
        RunResult {
            errors,
            lines_input: input,
            success,
            ..RunResult::new()
        }
    }

    #[test]
    fn absorb_sums_counters_and_ands_success() {
        let mut merged = RunResult::new();
        merged.absorb(&result(0, 10, true));
        merged.absorb(&result(2, 5, false));
        assert_eq!(merged.errors, 2);
        assert_eq!(merged.lines_input, 15);
        assert!(!merged.success);
    }

    #[test]
    fn absorb_is_order_independent() {
        let a = result(1, 3, true);
        let b = result(0, 7, true);
        let c = result(2, 11, false);

        let mut left = RunResult::new();
        left.absorb(&a);
        left.absorb(&b);
        left.absorb(&c);

        let mut right = RunResult::new();
        right.absorb(&c);
        right.absorb(&a);
        right.absorb(&b);

        assert_eq!(left.errors, right.errors);
        assert_eq!(left.lines_input, right.lines_input);
        assert_eq!(left.success, right.success);
    }
}
