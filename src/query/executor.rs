//! Run search execution
//!
//! Evaluates a [`RunQuery`] over run summaries: filter, sort, limit.

use super::{
    CompareOp, FieldRef, Literal, OrderDirection, Predicate, RunAttribute, RunFilter, RunQuery,
};
use crate::experiment::RunSummary;
use std::cmp::Ordering;

/// Value of a field on one run
#[derive(Debug, Clone, PartialEq)]
enum FieldValue<'a> {
    Str(&'a str),
    Number(f64),
}

impl FieldValue<'_> {
    fn cmp_for_sort(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Number(_), Self::Str(_)) => Ordering::Less,
            (Self::Str(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn field_value<'a>(run: &'a RunSummary, field: &FieldRef) -> Option<FieldValue<'a>> {
    match field {
        FieldRef::Param(key) => run.params.get(key).map(|v| FieldValue::Str(v.as_str())),
        FieldRef::Tag(key) => run.tags.get(key).map(|v| FieldValue::Str(v.as_str())),
        FieldRef::Metric(key) => run.metrics.get(key).copied().map(FieldValue::Number),
        FieldRef::Attribute(attribute) => match attribute {
            RunAttribute::RunId => Some(FieldValue::Str(&run.run_id)),
            RunAttribute::RunName => Some(FieldValue::Str(&run.run_name)),
            RunAttribute::ExperimentId => Some(FieldValue::Str(&run.experiment_id)),
            RunAttribute::Status => Some(FieldValue::Str(run.status.as_str())),
            RunAttribute::StartTime => {
                Some(FieldValue::Number(run.start_time.timestamp_millis() as f64))
            }
            RunAttribute::EndTime => run
                .end_time
                .map(|t| FieldValue::Number(t.timestamp_millis() as f64)),
        },
    }
}

/// Compare two numbers (epsilon equality for floats)
fn compare_numbers(actual: f64, op: CompareOp, expected: f64) -> bool {
    match op {
        CompareOp::Eq => (actual - expected).abs() < f64::EPSILON,
        CompareOp::NotEq => (actual - expected).abs() >= f64::EPSILON,
        CompareOp::Lt => actual < expected,
        CompareOp::LtEq => actual <= expected,
        CompareOp::Gt => actual > expected,
        CompareOp::GtEq => actual >= expected,
        CompareOp::Like | CompareOp::NotLike | CompareOp::ILike | CompareOp::NotILike => false,
    }
}

fn compare_strings(actual: &str, op: CompareOp, expected: &str) -> bool {
    match op {
        CompareOp::Eq => actual == expected,
        CompareOp::NotEq => actual != expected,
        CompareOp::Lt => actual < expected,
        CompareOp::LtEq => actual <= expected,
        CompareOp::Gt => actual > expected,
        CompareOp::GtEq => actual >= expected,
        CompareOp::Like => like(actual, expected),
        CompareOp::NotLike => !like(actual, expected),
        CompareOp::ILike => like(&actual.to_lowercase(), &expected.to_lowercase()),
        CompareOp::NotILike => !like(&actual.to_lowercase(), &expected.to_lowercase()),
    }
}

/// SQL `LIKE`: `%` matches any sequence, `_` exactly one character.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // matches[j]: text[..i] matches pattern[..j]
    let mut matches = vec![false; pattern.len() + 1];
    matches[0] = true;
    for j in 1..=pattern.len() {
        matches[j] = matches[j - 1] && pattern[j - 1] == '%';
    }

    for &c in &text {
        let mut diagonal = matches[0];
        matches[0] = false;
        for j in 1..=pattern.len() {
            let above = matches[j];
            matches[j] = match pattern[j - 1] {
                '%' => matches[j - 1] || above,
                '_' => diagonal,
                p => diagonal && p == c,
            };
            diagonal = above;
        }
    }
    matches[pattern.len()]
}

impl Predicate {
    /// Whether the run satisfies this comparison. Missing fields never match.
    #[must_use]
    pub fn matches(&self, run: &RunSummary) -> bool {
        let Some(actual) = field_value(run, &self.field) else {
            return false;
        };
        match (&actual, &self.value) {
            (FieldValue::Number(a), Literal::Number(b)) => compare_numbers(*a, self.op, *b),
            (FieldValue::Number(a), Literal::Str(b)) => b
                .trim()
                .parse::<f64>()
                .is_ok_and(|b| compare_numbers(*a, self.op, b)),
            // String field against a number compares numerically when it parses
            (FieldValue::Str(a), Literal::Number(b)) => a
                .trim()
                .parse::<f64>()
                .is_ok_and(|a| compare_numbers(a, self.op, *b)),
            (FieldValue::Str(a), Literal::Str(b)) => compare_strings(a, self.op, b),
        }
    }
}

impl RunFilter {
    /// Whether the run satisfies the filter
    #[must_use]
    pub fn matches(&self, run: &RunSummary) -> bool {
        match self {
            Self::All => true,
            Self::Compare(predicate) => predicate.matches(run),
            Self::And(left, right) => left.matches(run) && right.matches(run),
            Self::Or(left, right) => left.matches(run) || right.matches(run),
        }
    }
}

/// Applies filter, ordering and limit of a [`RunQuery`].
#[derive(Debug, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    /// Create a new executor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run the query over `runs`.
    ///
    /// Order clauses sort missing values last in either direction; remaining
    /// ties fall back to start time, newest first, then run ID.
    ///
    /// # Example
    /// ```
    /// use tracklake::experiment::RunRecord;
    /// use tracklake::query::{QueryExecutor, RunQuery};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut run = RunRecord::new("r1", "0", "lr_model");
    /// run.log_param("lr", "0.1")?;
    ///
    /// let query = RunQuery::new().filter("params.lr = '0.1'")?;
    /// let found = QueryExecutor::new().execute(&query, vec![run.summary()]);
    /// assert_eq!(found.len(), 1);
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn execute(&self, query: &RunQuery, runs: Vec<RunSummary>) -> Vec<RunSummary> {
        let mut found: Vec<RunSummary> = runs
            .into_iter()
            .filter(|run| query.run_filter().matches(run))
            .collect();

        found.sort_by(|a, b| {
            query
                .order_clauses()
                .iter()
                .map(|order| {
                    match (field_value(a, &order.field), field_value(b, &order.field)) {
                        (Some(x), Some(y)) => match order.direction {
                            OrderDirection::Asc => x.cmp_for_sort(&y),
                            OrderDirection::Desc => y.cmp_for_sort(&x),
                        },
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.start_time.cmp(&a.start_time))
                .then_with(|| a.run_id.cmp(&b.run_id))
        });

        found.truncate(query.limit());
        found
    }
}
