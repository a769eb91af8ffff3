//! String Filter Parser
//!
//! Parses string filter expressions into a [`StringExpr`].
//!
//! # Supported Syntax
//!
//! ```text
//! element            bare word, any run of chars except ()"@!|&^, and whitespace
//! "quoted string"    element containing spaces or operator characters
//! !expr              negation
//! (expr)             grouping
//! a & b & c          conjunction
//! a | b | c          disjunction
//! a ^ b              exclusive or
//! ```
//!
//! Operators cannot be mixed at one level: `a & b | c` is rejected, write
//! `(a & b) | c` instead.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{consumed, map, value},
    multi::many0,
    sequence::{delimited, pair},
    IResult,
};

use crate::query::ast::{BinaryOp, StringExpr};
use crate::query::error::{QueryError, QueryResult};

/// Expression as read from the input, before operator validation
#[derive(Debug)]
enum RawExpr {
    Element(String),
    Not(Box<RawExpr>),
    Chain {
        text: String,
        first: Box<RawExpr>,
        rest: Vec<(BinaryOp, RawExpr)>,
    },
}

/// Parse a string filter expression
///
/// Returns `None` for an empty expression, which passes every entry.
pub fn parse_string_filter(input: &str) -> QueryResult<Option<StringExpr>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    match parse_expression(input) {
        Ok((remaining, raw)) => {
            if remaining.trim().is_empty() {
                build(raw).map(Some)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input in filter expression: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Parse(format!(
            "Invalid filter expression '{}': {:?}",
            input, e
        ))),
    }
}

/// Turn the raw tree into an expression, rejecting mixed operators
fn build(raw: RawExpr) -> QueryResult<StringExpr> {
    match raw {
        RawExpr::Element(v) => Ok(StringExpr::Element(v)),
        RawExpr::Not(inner) => Ok(StringExpr::Not(Box::new(build(*inner)?))),
        RawExpr::Chain { text, first, rest } => {
            let first = build(*first)?;
            let Some(op) = rest.first().map(|(op, _)| *op) else {
                return Ok(first);
            };
            if rest.iter().any(|(o, _)| *o != op) {
                return Err(QueryError::Parse(format!(
                    "Mixed operators detected in expression '{}'. Please use parentheses to determine precedence.",
                    text.trim()
                )));
            }

            let mut operands = vec![first];
            for (_, expr) in rest {
                operands.push(build(expr)?);
            }

            Ok(match op {
                BinaryOp::And => StringExpr::And(flatten(operands, |e| match e {
                    StringExpr::And(children) => Ok(children),
                    other => Err(other),
                })),
                BinaryOp::Or => StringExpr::Or(flatten(operands, |e| match e {
                    StringExpr::Or(children) => Ok(children),
                    other => Err(other),
                })),
                BinaryOp::Xor => {
                    let mut iter = operands.into_iter();
                    let mut acc = match iter.next() {
                        Some(e) => e,
                        None => return Err(QueryError::Parse("Empty expression".to_string())),
                    };
                    for e in iter {
                        acc = StringExpr::Xor(Box::new(acc), Box::new(e));
                    }
                    acc
                }
            })
        }
    }
}

/// Merge nested same-operator groups into their parent
fn flatten<F>(operands: Vec<StringExpr>, split: F) -> Vec<StringExpr>
where
    F: Fn(StringExpr) -> Result<Vec<StringExpr>, StringExpr>,
{
    let mut out = Vec::with_capacity(operands.len());
    for e in operands {
        match split(e) {
            Ok(children) => out.extend(children),
            Err(single) => out.push(single),
        }
    }
    out
}

fn is_element_char(c: char) -> bool {
    !"()\"@!|&^,".contains(c) && !c.is_whitespace()
}

/// Parse `simple (op simple)*`
fn parse_expression(input: &str) -> IResult<&str, RawExpr> {
    let (input, _) = multispace0(input)?;
    let (input, (text, (first, rest))) = consumed(pair(
        parse_simple,
        many0(pair(
            delimited(multispace0, parse_operator, multispace0),
            parse_simple,
        )),
    ))(input)?;

    Ok((
        input,
        RawExpr::Chain {
            text: text.to_string(),
            first: Box::new(first),
            rest,
        },
    ))
}

/// Parse an element, quoted string, parenthesised group or negation
fn parse_simple(input: &str) -> IResult<&str, RawExpr> {
    let (input, expr) = alt((parse_element, parse_quoted, parse_group, parse_negation))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, expr))
}

fn parse_element(input: &str) -> IResult<&str, RawExpr> {
    map(take_while1(is_element_char), |s: &str| {
        RawExpr::Element(s.to_string())
    })(input)
}

fn parse_quoted(input: &str) -> IResult<&str, RawExpr> {
    map(
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        |s: &str| RawExpr::Element(s.to_string()),
    )(input)
}

fn parse_group(input: &str) -> IResult<&str, RawExpr> {
    delimited(char('('), parse_expression, char(')'))(input)
}

fn parse_negation(input: &str) -> IResult<&str, RawExpr> {
    let (input, _) = char('!')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, inner) = parse_simple(input)?;
    Ok((input, RawExpr::Not(Box::new(inner))))
}

fn parse_operator(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::And, char('&')),
        value(BinaryOp::Or, char('|')),
        value(BinaryOp::Xor, char('^')),
    ))(input)
}
