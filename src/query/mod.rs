//! Run filter language
//!
//! Runs are searched with SQL-like boolean expressions over four namespaces:
//!
//! - `params.<key>`: parameter values (strings)
//! - `metrics.<key>`: latest metric value (numbers)
//! - `tags.<key>`: tag values (strings)
//! - `attributes.<name>`: `run_id`, `run_name`, `status`, `experiment_id`,
//!   `start_time`, `end_time` (times in epoch milliseconds)
//!
//! Comparisons use `=`, `!=`, `<`, `<=`, `>`, `>=`, `LIKE`, `ILIKE` (and
//! their `NOT` forms) against string or numeric literals, combined with
//! `AND`, `OR` and parentheses. A comparison against a field the run does not
//! have never matches.
//!
//! Expressions are tokenized and parsed with sqlparser's generic dialect,
//! then lowered into [`RunFilter`].
//!
//! References:
//! - sqlparser-rs: <https://docs.rs/sqlparser>

mod executor;

pub use executor::QueryExecutor;

use crate::{Error, Result};
use sqlparser::ast::{BinaryOperator, Expr, Ident, UnaryOperator, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use std::fmt;

/// Results returned when a query sets no explicit limit
pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// Run attribute addressable as `attributes.<name>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAttribute {
    /// Run ID
    RunId,
    /// Run name
    RunName,
    /// Run status (`RUNNING`, `FINISHED`, ...)
    Status,
    /// Parent experiment ID
    ExperimentId,
    /// Start time in epoch milliseconds
    StartTime,
    /// End time in epoch milliseconds
    EndTime,
}

impl RunAttribute {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "run_id" | "runid" => Some(Self::RunId),
            "run_name" | "runname" => Some(Self::RunName),
            "status" => Some(Self::Status),
            "experiment_id" | "experimentid" => Some(Self::ExperimentId),
            "start_time" | "starttime" => Some(Self::StartTime),
            "end_time" | "endtime" => Some(Self::EndTime),
            _ => None,
        }
    }

    /// Whether the attribute compares as a number
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::StartTime | Self::EndTime)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::RunId => "run_id",
            Self::RunName => "run_name",
            Self::Status => "status",
            Self::ExperimentId => "experiment_id",
            Self::StartTime => "start_time",
            Self::EndTime => "end_time",
        }
    }
}

/// Field a predicate or sort key refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    /// `params.<key>`
    Param(String),
    /// `metrics.<key>`
    Metric(String),
    /// `tags.<key>`
    Tag(String),
    /// `attributes.<name>`
    Attribute(RunAttribute),
}

impl FieldRef {
    fn from_parts(parts: &[Ident]) -> Result<Self> {
        let [namespace, key @ ..] = parts else {
            return Err(Error::ParseError("empty identifier".to_string()));
        };
        if key.is_empty() {
            return Err(Error::ParseError(format!(
                "'{}' needs a namespace: params., metrics., tags. or attributes.",
                namespace.value
            )));
        }
        let key = key
            .iter()
            .map(|ident| ident.value.as_str())
            .collect::<Vec<_>>()
            .join(".");

        match namespace.value.to_ascii_lowercase().as_str() {
            "params" | "param" | "parameters" => Ok(Self::Param(key)),
            "metrics" | "metric" => Ok(Self::Metric(key)),
            "tags" | "tag" => Ok(Self::Tag(key)),
            "attributes" | "attribute" | "attr" | "run" => RunAttribute::parse(&key)
                .map(Self::Attribute)
                .ok_or_else(|| Error::ParseError(format!("unknown run attribute '{key}'"))),
            other => Err(Error::ParseError(format!(
                "unknown namespace '{other}': expected params, metrics, tags or attributes"
            ))),
        }
    }

    /// Whether values of this field compare as numbers
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        match self {
            Self::Metric(_) => true,
            Self::Attribute(attribute) => attribute.is_numeric(),
            Self::Param(_) | Self::Tag(_) => false,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param(key) => write!(f, "params.{key}"),
            Self::Metric(key) => write!(f, "metrics.{key}"),
            Self::Tag(key) => write!(f, "tags.{key}"),
            Self::Attribute(attribute) => write!(f, "attributes.{}", attribute.as_str()),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=` / `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `LIKE` (case-sensitive, `%` and `_` wildcards)
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `ILIKE` (case-insensitive)
    ILike,
    /// `NOT ILIKE`
    NotILike,
}

impl CompareOp {
    const fn is_pattern(self) -> bool {
        matches!(self, Self::Like | Self::NotLike | Self::ILike | Self::NotILike)
    }

    /// Operator with operands swapped (`5 < x` is `x > 5`)
    const fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => other,
        }
    }
}

/// Literal operand
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Quoted string
    Str(String),
    /// Numeric literal
    Number(f64),
}

/// `field <op> literal`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Left-hand field
    pub field: FieldRef,
    /// Operator
    pub op: CompareOp,
    /// Right-hand literal
    pub value: Literal,
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunFilter {
    /// Empty filter: matches every run
    #[default]
    All,
    /// Single comparison
    Compare(Predicate),
    /// Both sides match
    And(Box<RunFilter>, Box<RunFilter>),
    /// Either side matches
    Or(Box<RunFilter>, Box<RunFilter>),
}

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (smallest first)
    Asc,
    /// Descending order (largest first)
    Desc,
}

/// One `ORDER BY` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Sort key
    pub field: FieldRef,
    /// Direction
    pub direction: OrderDirection,
}

/// Filter expression parser
pub struct FilterParser {
    dialect: GenericDialect,
}

impl Default for FilterParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterParser {
    /// Create a new filter parser
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Parse a filter expression. Blank input is [`RunFilter::All`].
    ///
    /// # Errors
    /// Returns `ParseError` for malformed expressions, unknown namespaces or
    /// attributes, and operand combinations the language does not support
    ///
    /// # Example
    /// ```
    /// use tracklake::query::{FilterParser, RunFilter};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let parser = FilterParser::new();
    /// let filter = parser.parse("params.data_version = '0' AND metrics.rmse < 150")?;
    /// assert!(matches!(filter, RunFilter::And(_, _)));
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&self, filter: &str) -> Result<RunFilter> {
        if filter.trim().is_empty() {
            return Ok(RunFilter::All);
        }
        let expr = self.parse_expr(filter)?;
        let parsed = Self::lower(&expr)?;
        tracing::debug!(filter = filter, "parsed run filter");
        Ok(parsed)
    }

    /// Parse an order clause such as `metrics.rmse ASC` (default ascending).
    ///
    /// # Errors
    /// Returns `ParseError` if the key is not a field reference
    pub fn parse_order_by(&self, clause: &str) -> Result<OrderBy> {
        let clause = clause.trim();
        let (field, direction) = match clause.rsplit_once(char::is_whitespace) {
            Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => (field, OrderDirection::Asc),
            Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => {
                (field, OrderDirection::Desc)
            }
            _ => (clause, OrderDirection::Asc),
        };

        let field = match self.parse_expr(field)? {
            Expr::CompoundIdentifier(parts) => FieldRef::from_parts(&parts)?,
            other => {
                return Err(Error::ParseError(format!(
                    "cannot order by '{other}': expected a field such as metrics.rmse"
                )))
            }
        };
        Ok(OrderBy { field, direction })
    }

    fn parse_expr(&self, input: &str) -> Result<Expr> {
        let mut parser = Parser::new(&self.dialect)
            .try_with_sql(input)
            .map_err(|e| Error::ParseError(format!("'{input}': {e}")))?;
        let expr = parser
            .parse_expr()
            .map_err(|e| Error::ParseError(format!("'{input}': {e}")))?;
        parser
            .expect_token(&Token::EOF)
            .map_err(|e| Error::ParseError(format!("'{input}': {e}")))?;
        Ok(expr)
    }

    fn lower(expr: &Expr) -> Result<RunFilter> {
        match expr {
            Expr::Nested(inner) => Self::lower(inner),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => Ok(RunFilter::And(
                    Box::new(Self::lower(left)?),
                    Box::new(Self::lower(right)?),
                )),
                BinaryOperator::Or => Ok(RunFilter::Or(
                    Box::new(Self::lower(left)?),
                    Box::new(Self::lower(right)?),
                )),
                _ => Self::lower_comparison(left, op, right),
            },
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let op = if *negated { CompareOp::NotLike } else { CompareOp::Like };
                Self::lower_pattern(expr, pattern, op)
            }
            Expr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => {
                let op = if *negated { CompareOp::NotILike } else { CompareOp::ILike };
                Self::lower_pattern(expr, pattern, op)
            }
            other => Err(Error::ParseError(format!(
                "unsupported expression '{other}': expected comparisons joined by AND/OR"
            ))),
        }
    }

    fn lower_comparison(left: &Expr, op: &BinaryOperator, right: &Expr) -> Result<RunFilter> {
        let op = match op {
            BinaryOperator::Eq => CompareOp::Eq,
            BinaryOperator::NotEq => CompareOp::NotEq,
            BinaryOperator::Lt => CompareOp::Lt,
            BinaryOperator::LtEq => CompareOp::LtEq,
            BinaryOperator::Gt => CompareOp::Gt,
            BinaryOperator::GtEq => CompareOp::GtEq,
            other => {
                return Err(Error::ParseError(format!("unsupported operator '{other}'")));
            }
        };

        // Accept `literal <op> field` too
        let (field, value, op) = match (Self::field(left), Self::field(right)) {
            (Some(field), None) => (field?, Self::literal(right)?, op),
            (None, Some(field)) => (field?, Self::literal(left)?, op.flipped()),
            _ => {
                return Err(Error::ParseError(format!(
                    "comparison between '{left}' and '{right}' must have one field and one literal"
                )));
            }
        };
        Ok(RunFilter::Compare(Predicate { field, op, value }))
    }

    fn lower_pattern(expr: &Expr, pattern: &Expr, op: CompareOp) -> Result<RunFilter> {
        debug_assert!(op.is_pattern());
        let field = Self::field(expr).ok_or_else(|| {
            Error::ParseError(format!("left side of LIKE must be a field, got '{expr}'"))
        })??;
        if field.is_numeric() {
            return Err(Error::ParseError(format!(
                "LIKE/ILIKE does not apply to numeric field {field}"
            )));
        }
        match Self::literal(pattern)? {
            value @ Literal::Str(_) => Ok(RunFilter::Compare(Predicate { field, op, value })),
            Literal::Number(_) => Err(Error::ParseError(format!(
                "LIKE pattern for {field} must be a quoted string"
            ))),
        }
    }

    fn field(expr: &Expr) -> Option<Result<FieldRef>> {
        match expr {
            Expr::CompoundIdentifier(parts) => Some(FieldRef::from_parts(parts)),
            Expr::Identifier(ident) => Some(FieldRef::from_parts(std::slice::from_ref(ident))),
            Expr::Nested(inner) => Self::field(inner),
            _ => None,
        }
    }

    fn literal(expr: &Expr) -> Result<Literal> {
        match expr {
            Expr::Value(Value::SingleQuotedString(s) | Value::DoubleQuotedString(s)) => {
                Ok(Literal::Str(s.clone()))
            }
            Expr::Value(Value::Number(n, _)) => n
                .parse::<f64>()
                .map(Literal::Number)
                .map_err(|_| Error::ParseError(format!("invalid number '{n}'"))),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match Self::literal(expr)? {
                Literal::Number(n) => Ok(Literal::Number(-n)),
                Literal::Str(s) => Err(Error::ParseError(format!("cannot negate string '{s}'"))),
            },
            Expr::Nested(inner) => Self::literal(inner),
            other => Err(Error::ParseError(format!(
                "expected a string or number literal, got '{other}'"
            ))),
        }
    }
}

/// Parse a filter expression with a default [`FilterParser`].
///
/// # Errors
/// See [`FilterParser::parse`]
pub fn parse_filter(filter: &str) -> Result<RunFilter> {
    FilterParser::new().parse(filter)
}

/// Run search request: filter, scope, ordering and limit.
///
/// Without `order_by` clauses results are ordered by start time, newest
/// first. Without experiment IDs the tracker searches its active experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct RunQuery {
    filter: RunFilter,
    experiment_ids: Vec<String>,
    order_by: Vec<OrderBy>,
    max_results: usize,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQuery {
    /// Query matching every run
    #[must_use]
    pub const fn new() -> Self {
        Self {
            filter: RunFilter::All,
            experiment_ids: Vec::new(),
            order_by: Vec::new(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Set the filter from an expression.
    ///
    /// # Errors
    /// Returns `ParseError` if the expression is malformed
    pub fn filter(mut self, filter: &str) -> Result<Self> {
        self.filter = parse_filter(filter)?;
        Ok(self)
    }

    /// Set an already parsed filter
    #[must_use]
    pub fn with_filter(mut self, filter: RunFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Restrict the search to these experiments
    #[must_use]
    pub fn experiment_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.experiment_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Add an order clause such as `metrics.rmse ASC`.
    ///
    /// # Errors
    /// Returns `ParseError` if the clause is malformed
    pub fn order_by(mut self, clause: &str) -> Result<Self> {
        self.order_by.push(FilterParser::new().parse_order_by(clause)?);
        Ok(self)
    }

    /// Limit the number of returned runs
    #[must_use]
    pub const fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Parsed filter
    #[must_use]
    pub const fn run_filter(&self) -> &RunFilter {
        &self.filter
    }

    /// Experiments to search; empty means the active experiment
    #[must_use]
    pub fn experiment_scope(&self) -> &[String] {
        &self.experiment_ids
    }

    /// Order clauses, first clause most significant
    #[must_use]
    pub fn order_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Maximum number of results
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.max_results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(filter: &RunFilter) -> &Predicate {
        match filter {
            RunFilter::Compare(predicate) => predicate,
            other => panic!("expected a comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert_eq!(parse_filter("").unwrap(), RunFilter::All);
        assert_eq!(parse_filter("   ").unwrap(), RunFilter::All);
    }

    #[test]
    fn test_param_equality() {
        let filter = parse_filter("params.data_version = '0'").unwrap();
        let predicate = compare(&filter);
        assert_eq!(predicate.field, FieldRef::Param("data_version".to_string()));
        assert_eq!(predicate.op, CompareOp::Eq);
        assert_eq!(predicate.value, Literal::Str("0".to_string()));
    }

    #[test]
    fn test_metric_range_and_negative_numbers() {
        let filter = parse_filter("metrics.r2 > -0.5").unwrap();
        let predicate = compare(&filter);
        assert_eq!(predicate.field, FieldRef::Metric("r2".to_string()));
        assert_eq!(predicate.op, CompareOp::Gt);
        assert_eq!(predicate.value, Literal::Number(-0.5));
    }

    #[test]
    fn test_literal_on_left_flips_operator() {
        let filter = parse_filter("150 > metrics.rmse").unwrap();
        let predicate = compare(&filter);
        assert_eq!(predicate.field, FieldRef::Metric("rmse".to_string()));
        assert_eq!(predicate.op, CompareOp::Lt);
    }

    #[test]
    fn test_and_or_nesting() {
        let filter =
            parse_filter("(tags.team = 'pricing' OR tags.team = 'ops') AND attributes.status = 'FINISHED'")
                .unwrap();
        let RunFilter::And(left, right) = filter else {
            panic!("expected AND at the root");
        };
        assert!(matches!(*left, RunFilter::Or(_, _)));
        assert_eq!(
            compare(&right).field,
            FieldRef::Attribute(RunAttribute::Status)
        );
    }

    #[test]
    fn test_like_and_not_ilike() {
        let like = parse_filter("attributes.run_name LIKE 'lr%'").unwrap();
        assert_eq!(compare(&like).op, CompareOp::Like);

        let not_ilike = parse_filter("tags.owner NOT ILIKE '%BOT%'").unwrap();
        assert_eq!(compare(&not_ilike).op, CompareOp::NotILike);
    }

    #[test]
    fn test_dotted_keys() {
        let filter = parse_filter("tags.mlflow.runName = 'lr'").unwrap();
        assert_eq!(
            compare(&filter).field,
            FieldRef::Tag("mlflow.runName".to_string())
        );
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "params.lr =",
            "foo.lr = 1",
            "lr = 1",
            "attributes.color = 'red'",
            "metrics.rmse LIKE '1%'",
            "params.a = params.b",
            "params.a = 1 garbage",
            "NOT params.a = '1'",
        ] {
            assert!(
                matches!(parse_filter(bad), Err(Error::ParseError(_))),
                "{bad} should fail to parse"
            );
        }
    }

    #[test]
    fn test_order_by_clause() {
        let parser = FilterParser::new();
        let order = parser.parse_order_by("metrics.rmse DESC").unwrap();
        assert_eq!(order.field, FieldRef::Metric("rmse".to_string()));
        assert_eq!(order.direction, OrderDirection::Desc);

        let default = parser.parse_order_by("attributes.start_time").unwrap();
        assert_eq!(default.direction, OrderDirection::Asc);

        assert!(parser.parse_order_by("1 + 2").is_err());
    }

    #[test]
    fn test_run_query_builder() {
        let query = RunQuery::new()
            .filter("metrics.rmse < 10")
            .unwrap()
            .experiment_ids(["1", "2"])
            .order_by("metrics.rmse")
            .unwrap()
            .max_results(5);
        assert_eq!(query.experiment_scope(), ["1", "2"]);
        assert_eq!(query.order_clauses().len(), 1);
        assert_eq!(query.limit(), 5);
    }
}
