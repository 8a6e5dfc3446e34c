//! SampleTable Condition - row filter expressions
//!
//! A condition is a boolean expression over column names, evaluated per row
//! against the row's actual values:
//!
//! ```text
//! reward_status == true and reward > 0
//! not (score < 0.5 or label == 'skip')
//! 0 <= advantage < 10 && prompt != None
//! ```
//!
//! - Connectives: `and`/`&&`, `or`/`||`, `not`/`!` (short-circuiting)
//! - Comparisons: `==` (or `=`), `!=`, `<`, `<=`, `>`, `>=`, chainable
//! - Literals: integers, floats, quoted strings, `true`/`false`, `null`/`None`
//! - A bare column is tested for truthiness
//!
//! Columns missing from the evaluated row read as `null`.

mod error;
mod expr;
mod lexer;
mod parser;

pub use error::ConditionError;
pub use expr::{CompareOp, Expr};

use lexer::Lexer;
use parser::Parser;
use sampletable_common::{TableSchema, Value};
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Maximum accepted condition length in bytes
const MAX_INPUT_BYTES: usize = 64 * 1024;

/// Source of column values for one row
pub trait ColumnValues {
    fn column_value(&self, name: &str) -> Option<&Value>;
}

impl<S: BuildHasher> ColumnValues for HashMap<String, Value, S> {
    fn column_value(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl ColumnValues for BTreeMap<String, Value> {
    fn column_value(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl ColumnValues for [(String, Value)] {
    fn column_value(&self, name: &str) -> Option<&Value> {
        self.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A parsed condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
    columns: BTreeMap<String, usize>,
}

impl Condition {
    /// Parse a condition string
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        if input.len() > MAX_INPUT_BYTES {
            return Err(ConditionError::InputTooLarge {
                max_bytes: MAX_INPUT_BYTES,
                actual_bytes: input.len(),
            });
        }
        let tokens = Lexer::new(input).lex()?;
        let (expr, columns) = Parser::new(tokens).parse()?;
        Ok(Self {
            source: input.to_string(),
            expr,
            columns,
        })
    }

    /// Parse a condition and check every referenced column is in `schema`
    pub fn bind(input: &str, schema: &TableSchema) -> Result<Self, ConditionError> {
        let condition = Self::parse(input)?;
        condition.validate(|name| schema.contains(name))?;
        Ok(condition)
    }

    /// Reject references to columns `is_known` does not accept
    pub fn validate(&self, is_known: impl Fn(&str) -> bool) -> Result<(), ConditionError> {
        match self.columns.iter().find(|(name, _)| !is_known(name)) {
            Some((name, position)) => Err(ConditionError::UnknownColumn {
                name: name.clone(),
                position: *position,
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Referenced column names, sorted and deduplicated
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    #[must_use]
    pub fn references(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Evaluate against one row
    pub fn evaluate<R: ColumnValues + ?Sized>(&self, row: &R) -> Result<bool, ConditionError> {
        Ok(self.expr.eval(row)?.is_truthy())
    }
}

impl std::str::FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
