//! Threshold decision

use super::result::MonitorResult;
use super::rule::{Rule, ThresholdKind, ThresholdOperator};

/// Absolute tolerance for `==` and `!=`
pub const EQUALITY_TOLERANCE: f64 = 0.0001;

/// Whether `result` breaches `rule`'s threshold
pub fn is_triggered(rule: &Rule, result: &MonitorResult) -> bool {
    let (Some(kind), Some(bound)) = (rule.threshold_kind, rule.threshold_value) else {
        return false;
    };

    let value = match kind {
        ThresholdKind::DiffCount => result.diff_count as f64,
        ThresholdKind::DiffPercent => result.diff_percent,
        ThresholdKind::RowCountDiff => result.row_count_diff() as f64,
    };

    compare(value, rule.threshold_operator, bound)
}

fn compare(value: f64, operator: ThresholdOperator, bound: f64) -> bool {
    match operator {
        ThresholdOperator::Gt => value > bound,
        ThresholdOperator::Gte => value >= bound,
        ThresholdOperator::Lt => value < bound,
        ThresholdOperator::Lte => value <= bound,
        ThresholdOperator::Eq => (value - bound).abs() <= EQUALITY_TOLERANCE,
        ThresholdOperator::Ne => (value - bound).abs() > EQUALITY_TOLERANCE,
    }
}
