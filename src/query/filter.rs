//! Predicate parsing and evaluation
//!
//! A predicate arrives as JSON and is parsed once into a [`Filter`] tree.
//! Evaluation is a plain match over closed enums; there is no string
//! dispatch at match time.
//!
//! # Shape
//!
//! - Array: at least one element matches
//! - Object: every entry matches
//! - `"$or": [..]` entry: at least one branch matches
//! - `"field": {"$op": operand, ..}`: every operator holds for the field
//! - `"field": value`: structural equality, a missing field reads as null

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use super::errors::{QueryError, QueryResult};
use crate::document::Document;

/// A parsed predicate.
#[derive(Debug, Clone)]
pub enum Filter {
    /// At least one branch matches
    Any(Vec<Filter>),
    /// Every clause matches; empty matches everything
    All(Vec<Clause>),
}

/// One entry of a predicate object.
#[derive(Debug, Clone)]
pub enum Clause {
    Or(Vec<Filter>),
    Field { name: String, test: FieldTest },
}

/// What a field must satisfy.
#[derive(Debug, Clone)]
pub enum FieldTest {
    Equals(Value),
    Operators(Vec<Operator>),
}

/// Field operators.
#[derive(Debug, Clone)]
pub enum Operator {
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Eq(Value),
    Ne(Value),
    Regex(Regex),
    In(Vec<Value>),
    Nin(Vec<Value>),
    All(Vec<Value>),
    Exists(bool),
    Size(u64),
    /// Branches evaluated against the whole document
    Or(Vec<Filter>),
}

impl Filter {
    /// A filter that matches every document.
    pub fn match_all() -> Self {
        Filter::All(Vec::new())
    }

    /// Parses a JSON predicate.
    pub fn parse(predicate: &Value) -> QueryResult<Self> {
        match predicate {
            Value::Array(branches) => Ok(Filter::Any(parse_branches(branches)?)),
            Value::Object(entries) => {
                let clauses = entries
                    .iter()
                    .map(|(name, target)| Clause::parse(name, target))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Filter::All(clauses))
            }
            other => Err(QueryError::InvalidPredicate(format!(
                "expected an object or array, got {}",
                type_name(other)
            ))),
        }
    }

    /// Checks whether `doc` matches.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Any(branches) => branches.iter().any(|b| b.matches(doc)),
            Filter::All(clauses) => clauses.iter().all(|c| c.matches(doc)),
        }
    }

    /// Whether this filter accepts every document without looking at it.
    pub fn is_match_all(&self) -> bool {
        matches!(self, Filter::All(clauses) if clauses.is_empty())
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::match_all()
    }
}

impl Clause {
    fn parse(name: &str, target: &Value) -> QueryResult<Self> {
        if name == "$or" {
            return Ok(Clause::Or(parse_or(target)?));
        }
        if name.starts_with('$') {
            return Err(QueryError::UnknownOperator(name.to_string()));
        }
        Ok(Clause::Field {
            name: name.to_string(),
            test: FieldTest::parse(target)?,
        })
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Clause::Or(branches) => branches.iter().any(|b| b.matches(doc)),
            Clause::Field { name, test } => test.matches(doc, name),
        }
    }
}

impl FieldTest {
    fn parse(target: &Value) -> QueryResult<Self> {
        let ops = match target {
            Value::Object(ops) if !ops.is_empty() && ops.keys().any(|k| k.starts_with('$')) => ops,
            other => return Ok(FieldTest::Equals(other.clone())),
        };
        if let Some(plain) = ops.keys().find(|k| !k.starts_with('$')) {
            return Err(QueryError::InvalidPredicate(format!(
                "property {:?} mixed with operators",
                plain
            )));
        }
        ops.iter()
            .map(|(op, operand)| Operator::parse(op, operand))
            .collect::<QueryResult<Vec<_>>>()
            .map(FieldTest::Operators)
    }

    fn matches(&self, doc: &Document, name: &str) -> bool {
        let present = doc.get(name);
        let value = present.unwrap_or(&Value::Null);
        match self {
            FieldTest::Equals(expected) => values_equal(value, expected),
            FieldTest::Operators(ops) => ops
                .iter()
                .all(|op| op.matches(doc, value, present.is_some())),
        }
    }
}

impl Operator {
    fn parse(op: &str, operand: &Value) -> QueryResult<Self> {
        let parsed = match op {
            "$lt" => Operator::Lt(operand.clone()),
            "$lte" => Operator::Lte(operand.clone()),
            "$gt" => Operator::Gt(operand.clone()),
            "$gte" => Operator::Gte(operand.clone()),
            "$eq" => Operator::Eq(operand.clone()),
            "$ne" => Operator::Ne(operand.clone()),
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| QueryError::operand(op, "expected a pattern string"))?;
                let regex = Regex::new(pattern).map_err(|e| QueryError::InvalidRegex {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                Operator::Regex(regex)
            }
            "$in" => Operator::In(array_operand(op, operand)?),
            "$nin" => Operator::Nin(array_operand(op, operand)?),
            "$all" => Operator::All(array_operand(op, operand)?),
            "$exists" => Operator::Exists(
                operand
                    .as_bool()
                    .ok_or_else(|| QueryError::operand(op, "expected a boolean"))?,
            ),
            "$size" => Operator::Size(
                operand
                    .as_u64()
                    .ok_or_else(|| QueryError::operand(op, "expected a non-negative integer"))?,
            ),
            "$or" => Operator::Or(parse_or(operand)?),
            unknown => return Err(QueryError::UnknownOperator(unknown.to_string())),
        };
        Ok(parsed)
    }

    fn matches(&self, doc: &Document, value: &Value, present: bool) -> bool {
        match self {
            Operator::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
            Operator::Lte(bound) => matches!(
                compare(value, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
            Operator::Gte(bound) => matches!(
                compare(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Eq(expected) => values_equal(value, expected),
            Operator::Ne(expected) => !values_equal(value, expected),
            Operator::Regex(regex) => value.as_str().map_or(false, |s| regex.is_match(s)),
            Operator::In(candidates) => contains_any(value, candidates),
            Operator::Nin(candidates) => !contains_any(value, candidates),
            Operator::All(required) => match value {
                Value::Array(items) => required
                    .iter()
                    .all(|r| items.iter().any(|item| values_equal(item, r))),
                _ => false,
            },
            Operator::Exists(expected) => present == *expected,
            Operator::Size(expected) => size_of(value) == Some(*expected),
            Operator::Or(branches) => branches.iter().any(|b| b.matches(doc)),
        }
    }
}

fn parse_or(target: &Value) -> QueryResult<Vec<Filter>> {
    match target {
        Value::Array(branches) => parse_branches(branches),
        _ => Err(QueryError::operand("$or", "expected an array of predicates")),
    }
}

fn parse_branches(branches: &[Value]) -> QueryResult<Vec<Filter>> {
    branches.iter().map(Filter::parse).collect()
}

fn array_operand(op: &str, operand: &Value) -> QueryResult<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(QueryError::operand(op, "expected an array")),
    }
}

/// Structural equality with numbers compared by value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).map_or(false, |w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Orders two numbers or two strings. Anything else is incomparable.
fn compare(value: &Value, bound: &Value) -> Option<Ordering> {
    match (value, bound) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains_any(value: &Value, candidates: &[Value]) -> bool {
    match value {
        Value::Array(items) => items
            .iter()
            .any(|item| candidates.iter().any(|c| values_equal(item, c))),
        single => candidates.iter().any(|c| values_equal(single, c)),
    }
}

fn size_of(value: &Value) -> Option<u64> {
    match value {
        Value::Array(items) => Some(items.len() as u64),
        Value::String(s) => Some(s.len() as u64),
        Value::Object(entries) => Some(entries.len() as u64),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
