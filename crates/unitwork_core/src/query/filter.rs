//! Serializable predicate tree and its two interpreters.
//!
//! # Responsibility
//! - Describe row filters as data instead of closures.
//! - Render filters to parameterized SQL for the store.
//! - Evaluate filters against in-memory records with the same semantics.
//!
//! # Invariants
//! - Every value reaches SQL as a bound parameter, never as text.
//! - Identifiers are validated before rendering (`column` or
//!   `relation.column`).
//! - Evaluation follows SQL three-valued logic: a comparison involving NULL
//!   is unknown, and an unknown result never matches.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern is a valid regex")
});

/// A value bound into composed SQL or read back from an entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Literal {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compares two values the way SQLite orders them.
    ///
    /// Returns `None` when either side is NULL. Integers and reals compare
    /// numerically; otherwise storage classes order as
    /// numeric < text < blob.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Real(b)) => (*a as f64).partial_cmp(b),
            (Self::Real(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Blob(a), Self::Blob(b)) => Some(a.cmp(b)),
            (left, right) => Some(left.class_rank().cmp(&right.class_rank())),
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Integer(_) | Self::Real(_) => 1,
            Self::Text(_) => 2,
            Self::Blob(_) => 3,
        }
    }
}

impl ToSql for Literal {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
        })
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Literal {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Literal {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Literal>> From<Option<T>> for Literal {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// Boolean expression over entity columns.
///
/// Columns are named `column` for the queried entity or `relation.column`
/// for a relation pulled in by an include directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOp,
        value: Literal,
    },
    /// SQL `LIKE` with `%`/`_` wildcards, ASCII case-insensitive.
    Like { column: String, pattern: String },
    IsNull { column: String },
    IsNotNull { column: String },
    In { column: String, values: Vec<Literal> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Literal>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull {
            column: column.into(),
        }
    }

    pub fn in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Literal>,
    {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Conjunction of `self` and `other`, flattening nested `And` nodes.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`, flattening nested `Or` nodes.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Every column referenced by this filter, in visit order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare { column, .. }
            | Self::Like { column, .. }
            | Self::IsNull { column }
            | Self::IsNotNull { column }
            | Self::In { column, .. } => out.push(column.as_str()),
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_columns(out);
                }
            }
            Self::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Renders this filter as a SQL boolean expression.
    ///
    /// Unqualified columns are qualified with `root_table`. Values are
    /// appended to `binds` in placeholder order.
    pub fn to_sql(&self, root_table: &str, binds: &mut Vec<Literal>) -> Result<String, String> {
        Ok(match self {
            Self::Compare { column, op, value } => {
                binds.push(value.clone());
                format!("{} {} ?", qualify(root_table, column)?, op.sql())
            }
            Self::Like { column, pattern } => {
                binds.push(Literal::Text(pattern.clone()));
                format!("{} LIKE ?", qualify(root_table, column)?)
            }
            Self::IsNull { column } => format!("{} IS NULL", qualify(root_table, column)?),
            Self::IsNotNull { column } => {
                format!("{} IS NOT NULL", qualify(root_table, column)?)
            }
            Self::In { column, values } => {
                let column = qualify(root_table, column)?;
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                binds.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                format!("{column} IN ({placeholders})")
            }
            Self::And(parts) => join_parts(parts, " AND ", "1 = 1", root_table, binds)?,
            Self::Or(parts) => join_parts(parts, " OR ", "1 = 0", root_table, binds)?,
            Self::Not(inner) => format!("NOT ({})", inner.to_sql(root_table, binds)?),
        })
    }

    /// Evaluates this filter against an in-memory record.
    ///
    /// `lookup` resolves a column name to its value; unknown columns read as
    /// NULL.
    pub fn evaluate<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<Literal>,
    {
        self.evaluate_tristate(lookup).unwrap_or(false)
    }

    fn evaluate_tristate<F>(&self, lookup: &F) -> Option<bool>
    where
        F: Fn(&str) -> Option<Literal>,
    {
        let read = |column: &str| lookup(column).unwrap_or(Literal::Null);
        match self {
            Self::Compare { column, op, value } => {
                read(column).compare(value).map(|ordering| op.holds(ordering))
            }
            Self::Like { column, pattern } => match read(column) {
                Literal::Null => None,
                Literal::Text(text) => Some(like_matches(pattern, &text)),
                Literal::Integer(value) => Some(like_matches(pattern, &value.to_string())),
                Literal::Real(value) => Some(like_matches(pattern, &real_text(value))),
                Literal::Blob(bytes) => {
                    Some(like_matches(pattern, &String::from_utf8_lossy(&bytes)))
                }
            },
            Self::IsNull { column } => Some(read(column).is_null()),
            Self::IsNotNull { column } => Some(!read(column).is_null()),
            Self::In { column, values } => {
                let current = read(column);
                if current.is_null() {
                    return if values.is_empty() { Some(false) } else { None };
                }
                let mut unknown = false;
                for candidate in values {
                    match current.compare(candidate) {
                        Some(Ordering::Equal) => return Some(true),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Self::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.evaluate_tristate(lookup) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            Self::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.evaluate_tristate(lookup) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Self::Not(inner) => inner.evaluate_tristate(lookup).map(|value| !value),
        }
    }
}

/// Checks that `name` is `column` or `relation.column`.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(format!("invalid column reference `{name}`"))
    }
}

/// Quotes a validated column reference, qualifying bare names with `root_table`.
pub(crate) fn qualify(root_table: &str, column: &str) -> Result<String, String> {
    validate_identifier(column)?;
    Ok(match column.split_once('.') {
        Some((relation, name)) => format!("\"{relation}\".\"{name}\""),
        None => format!("\"{root_table}\".\"{column}\""),
    })
}

fn join_parts(
    parts: &[Filter],
    separator: &str,
    empty: &str,
    root_table: &str,
    binds: &mut Vec<Literal>,
) -> Result<String, String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|part| part.to_sql(root_table, binds).map(|sql| format!("({sql})")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rendered.join(separator))
}

/// Renders a real the way SQLite casts it to text (`%!.15g`): 15
/// significant digits, and integral values keep a trailing `.0`.
fn real_text(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if value == 0.0 {
        return "0.0".to_string();
    }

    let scientific = format!("{value:.14e}");
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if !(-4..15).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{sign}{:02}", keep_point(mantissa), exponent.abs());
    }
    let decimals = usize::try_from(14 - exponent).unwrap_or(0);
    keep_point(&format!("{value:.decimals$}"))
}

fn keep_point(number: &str) -> String {
    if !number.contains('.') {
        return format!("{number}.0");
    }
    let trimmed = number.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}

/// SQL `LIKE` with ASCII case folding.
///
/// Greedy match that backtracks only to the most recent `%`, so the cost is
/// bounded by `pattern.len() * text.len()`.
fn like_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut p, mut t) = (0, 0);
    // Pattern index after the last `%`, and the text index it currently covers up to.
    let mut resume: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                p += 1;
                resume = Some((p, t));
            }
            Some('_') => {
                p += 1;
                t += 1;
            }
            Some(expected) if *expected == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match resume {
                Some((after, covered)) => {
                    p = after;
                    t = covered + 1;
                    resume = Some((after, covered + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
