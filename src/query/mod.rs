//! Entry filters
//!
//! Declarative predicates used by views and ad hoc database queries:
//!
//! - **AST**: `EntryFilter` definitions and the string expression tree
//! - **Parser**: string filter expressions (`HEM & !ZN`, `"a b" | c`)
//! - **Filter**: validated, compiled filters evaluated against index entries
//!
//! # Examples
//!
//! ```rust,ignore
//! use moldb::query::{compile_filters, matches_all, EntryFilter, FilterComparisonType};
//!
//! let filters = compile_filters(&[
//!     EntryFilter::int("AtomCount", FilterComparisonType::NumberGreater, 1000),
//!     EntryFilter::strings("ResidueTypes", FilterComparisonType::StringEqual, "HEM & !ZN"),
//! ])?;
//! let hits: Vec<_> = entries.iter().filter(|e| matches_all(&filters, e)).collect();
//! ```

mod ast;
mod error;
mod filter;
mod parser;

pub use ast::{BinaryOp, EntryFilter, FilterComparisonType, FilterPropertyType, StringExpr};
pub use error::{QueryError, QueryResult};
pub use filter::{compile_filters, matches_all, parse_date, CompiledFilter};
pub use parser::parse_string_filter;
