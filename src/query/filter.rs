//! Compiled entry filters
//!
//! An [`EntryFilter`] is validated once and turned into a [`CompiledFilter`]
//! that can be evaluated against many entries. Regular expressions are
//! compiled up front so a bad pattern fails at view creation, not while a
//! view is being recomputed.

use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use crate::query::ast::{EntryFilter, FilterComparisonType, FilterPropertyType, StringExpr};
use crate::query::error::{QueryError, QueryResult};
use crate::query::parser::parse_string_filter;
use crate::storage::IndexEntry;

const DOUBLE_EPSILON: f64 = 1e-8;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy)]
enum NumberOp {
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl NumberOp {
    fn from_comparison(c: FilterComparisonType) -> Option<Self> {
        match c {
            FilterComparisonType::NumberEqual => Some(Self::Equal),
            FilterComparisonType::NumberLess => Some(Self::Less),
            FilterComparisonType::NumberLessEqual => Some(Self::LessEqual),
            FilterComparisonType::NumberGreater => Some(Self::Greater),
            FilterComparisonType::NumberGreaterEqual => Some(Self::GreaterEqual),
            _ => None,
        }
    }

    fn apply<T: PartialOrd>(&self, a: T, b: T) -> bool {
        match self {
            Self::Equal => a == b,
            Self::Less => a < b,
            Self::LessEqual => a <= b,
            Self::Greater => a > b,
            Self::GreaterEqual => a >= b,
        }
    }

    fn apply_f64(&self, a: f64, b: f64) -> bool {
        match self {
            Self::Equal => (a - b).abs() < DOUBLE_EPSILON,
            _ => self.apply(a, b),
        }
    }
}

#[derive(Debug)]
enum Predicate {
    Int { op: NumberOp, value: i64 },
    Double { op: NumberOp, value: f64 },
    Date { op: NumberOp, value: NaiveDate },
    Equal { expr: Option<StringExpr> },
    ContainsWord { expr: Option<StringExpr> },
    Regex { pattern: Regex },
}

/// A validated filter ready for evaluation
#[derive(Debug)]
pub struct CompiledFilter {
    source: EntryFilter,
    predicate: Predicate,
}

/// Parse a `yyyy-M-d` date
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

fn unsupported(filter: &EntryFilter) -> QueryError {
    QueryError::UnsupportedComparison {
        comparison: filter.comparison.to_string(),
        property_type: filter.property_type.to_string(),
    }
}

impl CompiledFilter {
    /// Validate and compile a filter
    pub fn compile(filter: &EntryFilter) -> QueryResult<Self> {
        let predicate = if filter.comparison.is_numeric() {
            let op = NumberOp::from_comparison(filter.comparison).ok_or_else(|| unsupported(filter))?;
            let raw = filter.value.trim();
            match filter.property_type {
                FilterPropertyType::Int => Predicate::Int {
                    op,
                    value: raw.parse().map_err(|_| {
                        QueryError::InvalidValue(format!("'{}' is not a valid integer", raw))
                    })?,
                },
                FilterPropertyType::Double => Predicate::Double {
                    op,
                    value: raw.parse().map_err(|_| {
                        QueryError::InvalidValue(format!("'{}' is not a valid number", raw))
                    })?,
                },
                FilterPropertyType::Date => Predicate::Date {
                    op,
                    value: parse_date(raw).ok_or_else(|| {
                        QueryError::InvalidValue(format!(
                            "'{}' is not a valid date format. The expected format is yyyy-m-d, for example 2007-5-27",
                            raw
                        ))
                    })?,
                },
                FilterPropertyType::String | FilterPropertyType::StringArray => {
                    return Err(unsupported(filter))
                }
            }
        } else {
            if filter.property_type.is_numeric() {
                return Err(unsupported(filter));
            }
            match filter.comparison {
                FilterComparisonType::StringEqual => Predicate::Equal {
                    expr: parse_string_filter(&filter.value)?,
                },
                FilterComparisonType::StringContainsWord => Predicate::ContainsWord {
                    expr: parse_string_filter(&filter.value)?,
                },
                FilterComparisonType::StringRegex => {
                    let raw = filter.value.trim();
                    let pattern = RegexBuilder::new(raw)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| QueryError::InvalidRegex {
                            pattern: raw.to_string(),
                            message: e.to_string(),
                        })?;
                    Predicate::Regex { pattern }
                }
                _ => return Err(unsupported(filter)),
            }
        };

        Ok(Self {
            source: filter.clone(),
            predicate,
        })
    }

    /// The filter this was compiled from
    pub fn source(&self) -> &EntryFilter {
        &self.source
    }

    /// Check whether an entry passes the filter
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        let name = self.source.property_name.as_str();
        match &self.predicate {
            Predicate::Int { op, value } => entry
                .get_int(name)
                .map(|v| op.apply(v, *value))
                .unwrap_or(false),
            Predicate::Double { op, value } => entry
                .get_double(name)
                .map(|v| op.apply_f64(v, *value))
                .unwrap_or(false),
            Predicate::Date { op, value } => entry
                .get_string(name)
                .and_then(|s| parse_date(&s))
                .map(|d| op.apply(d, *value))
                .unwrap_or(false),
            Predicate::Equal { expr } => {
                let Some(expr) = expr else { return true };
                match entry.get_string_array(name) {
                    Some(xs) => {
                        let set: HashSet<String> = xs.iter().map(|x| x.to_lowercase()).collect();
                        expr.passes(&|s: &str| set.contains(&s.to_lowercase()))
                    }
                    None => expr.passes(&|_: &str| false),
                }
            }
            Predicate::ContainsWord { expr } => {
                let Some(expr) = expr else { return true };
                match entry.get_string_array(name) {
                    Some(xs) => {
                        let lowered: Vec<String> = xs.iter().map(|x| x.to_lowercase()).collect();
                        expr.passes(&|s: &str| contains_word(&lowered, &s.to_lowercase()))
                    }
                    None => expr.passes(&|_: &str| false),
                }
            }
            Predicate::Regex { pattern } => {
                if pattern.as_str().is_empty() {
                    return true;
                }
                entry
                    .get_string_array(name)
                    .map(|xs| xs.iter().any(|x| pattern.is_match(x)))
                    .unwrap_or(false)
            }
        }
    }
}

/// True if `word` occurs in one of `values` delimited by non-alphanumerics
fn contains_word(values: &[String], word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    values.iter().any(|value| {
        value.match_indices(word).any(|(start, _)| {
            let before_ok = value[..start]
                .chars()
                .next_back()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true);
            let after_ok = value[start + word.len()..]
                .chars()
                .next()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true);
            before_ok && after_ok
        })
    })
}

/// Compile a list of filters; fails on the first invalid one
pub fn compile_filters(filters: &[EntryFilter]) -> QueryResult<Vec<CompiledFilter>> {
    filters.iter().map(CompiledFilter::compile).collect()
}

/// Conjunction of all compiled filters
pub fn matches_all(filters: &[CompiledFilter], entry: &IndexEntry) -> bool {
    filters.iter().all(|f| f.matches(entry))
}
