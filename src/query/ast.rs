//! Entry filter definitions
//!
//! Declarative predicates attached to a view, plus the syntax tree of the
//! string filter expression language used by the string comparisons.
//!
//! # Example Filters
//!
//! ```text
//! AtomCount        Int          NumberGreater       1000
//! ResidueTypes     StringArray  StringEqual         HEM & !ZN
//! Title            String       StringContainsWord  "heme oxygenase" | cytochrome
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of the property a filter inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterPropertyType {
    Int,
    Double,
    /// `yyyy-M-d` date stored as a string property
    Date,
    String,
    StringArray,
}

impl FilterPropertyType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Double | Self::Date)
    }
}

impl fmt::Display for FilterPropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Int => "Int",
            Self::Double => "Double",
            Self::Date => "Date",
            Self::String => "String",
            Self::StringArray => "StringArray",
        };
        write!(f, "{}", s)
    }
}

/// Comparison applied between the property and the filter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterComparisonType {
    NumberEqual,
    NumberLess,
    NumberLessEqual,
    NumberGreater,
    NumberGreaterEqual,
    StringEqual,
    StringContainsWord,
    StringRegex,
}

impl FilterComparisonType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::NumberEqual
                | Self::NumberLess
                | Self::NumberLessEqual
                | Self::NumberGreater
                | Self::NumberGreaterEqual
        )
    }
}

impl fmt::Display for FilterComparisonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NumberEqual => "NumberEqual",
            Self::NumberLess => "NumberLess",
            Self::NumberLessEqual => "NumberLessEqual",
            Self::NumberGreater => "NumberGreater",
            Self::NumberGreaterEqual => "NumberGreaterEqual",
            Self::StringEqual => "StringEqual",
            Self::StringContainsWord => "StringContainsWord",
            Self::StringRegex => "StringRegex",
        };
        write!(f, "{}", s)
    }
}

/// A declarative predicate over one entry property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntryFilter {
    /// Name of the property to inspect
    pub property_name: String,
    pub property_type: FilterPropertyType,
    #[serde(rename = "ComparisonType")]
    pub comparison: FilterComparisonType,
    /// Raw value; a number, a date or a string filter expression
    pub value: String,
}

impl EntryFilter {
    pub fn new(
        property_name: impl Into<String>,
        property_type: FilterPropertyType,
        comparison: FilterComparisonType,
        value: impl Into<String>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            property_type,
            comparison,
            value: value.into(),
        }
    }

    /// Shorthand for an integer comparison
    pub fn int(property_name: impl Into<String>, comparison: FilterComparisonType, value: i64) -> Self {
        Self::new(property_name, FilterPropertyType::Int, comparison, value.to_string())
    }

    /// Shorthand for a string-array comparison
    pub fn strings(
        property_name: impl Into<String>,
        comparison: FilterComparisonType,
        expression: impl Into<String>,
    ) -> Self {
        Self::new(property_name, FilterPropertyType::StringArray, comparison, expression)
    }
}

impl fmt::Display for EntryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} '{}'",
            self.property_name, self.property_type, self.comparison, self.value
        )
    }
}

/// Binary operator of the string filter language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub fn symbol(&self) -> char {
        match self {
            Self::And => '&',
            Self::Or => '|',
            Self::Xor => '^',
        }
    }
}

/// Parsed string filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum StringExpr {
    /// A bare word or the contents of a quoted string
    Element(String),
    Not(Box<StringExpr>),
    And(Vec<StringExpr>),
    Or(Vec<StringExpr>),
    Xor(Box<StringExpr>, Box<StringExpr>),
}

impl StringExpr {
    /// Evaluate the expression, testing each element with `condition`
    pub fn passes<F>(&self, condition: &F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        match self {
            StringExpr::Element(value) => condition(value),
            StringExpr::Not(inner) => !inner.passes(condition),
            StringExpr::And(children) => children.iter().all(|c| c.passes(condition)),
            StringExpr::Or(children) => children.iter().any(|c| c.passes(condition)),
            StringExpr::Xor(left, right) => left.passes(condition) != right.passes(condition),
        }
    }

    /// Distinct element values in first-occurrence order
    pub fn elements(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_elements(&mut out);
        out
    }

    fn collect_elements<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            StringExpr::Element(v) => {
                if !out.contains(&v.as_str()) {
                    out.push(v);
                }
            }
            StringExpr::Not(inner) => inner.collect_elements(out),
            StringExpr::And(children) | StringExpr::Or(children) => {
                for c in children {
                    c.collect_elements(out);
                }
            }
            StringExpr::Xor(l, r) => {
                l.collect_elements(out);
                r.collect_elements(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(s: &str) -> StringExpr {
        StringExpr::Element(s.to_string())
    }

    #[test]
    fn test_entry_filter_json_shape() {
        let filter = EntryFilter::int("AtomCount", FilterComparisonType::NumberGreater, 10);
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(
            json,
            r#"{"PropertyName":"AtomCount","PropertyType":"Int","ComparisonType":"NumberGreater","Value":"10"}"#
        );
        let back: EntryFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_expression_evaluation() {
        let expr = StringExpr::And(vec![el("a"), StringExpr::Not(Box::new(el("b")))]);
        assert!(expr.passes(&|s: &str| s == "a"));
        assert!(!expr.passes(&|s: &str| s == "a" || s == "b"));

        let xor = StringExpr::Xor(Box::new(el("a")), Box::new(el("b")));
        assert!(xor.passes(&|s: &str| s == "b"));
        assert!(!xor.passes(&|_: &str| true));
    }

    #[test]
    fn test_elements_are_distinct() {
        let expr = StringExpr::Or(vec![el("x"), el("y"), StringExpr::Not(Box::new(el("x")))]);
        assert_eq!(expr.elements(), vec!["x", "y"]);
    }
}
