//! Recursive-descent parser
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons, unary minus.
//! Chained comparisons such as `0 < x <= 1` expand to a conjunction.

use crate::error::ConditionError;
use crate::expr::{CompareOp, Expr};
use crate::lexer::{SpannedToken, Token};
use sampletable_common::Value;
use std::collections::BTreeMap;

/// Maximum nesting depth of parentheses and prefix operators
pub(crate) const MAX_NESTING: usize = 32;

pub(crate) struct Parser<'a> {
    tokens: Vec<SpannedToken<'a>>,
    index: usize,
    nesting: usize,
    /// First position at which each column is referenced
    columns: BTreeMap<String, usize>,
}

impl<'a> Parser<'a> {
    pub(crate) const fn new(tokens: Vec<SpannedToken<'a>>) -> Self {
        Self {
            tokens,
            index: 0,
            nesting: 0,
            columns: BTreeMap::new(),
        }
    }

    /// Parse a complete expression, returning it with its referenced columns
    pub(crate) fn parse(mut self) -> Result<(Expr, BTreeMap<String, usize>), ConditionError> {
        let expr = self.parse_or()?;
        if !matches!(self.current().token, Token::Eof) {
            return Err(ConditionError::TrailingInput {
                position: self.current().position,
            });
        }
        Ok((expr, self.columns))
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut parts = vec![self.parse_and()?];
        while self.matches(&Token::Or) {
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::Or(parts) })
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut parts = vec![self.parse_not()?];
        while self.matches(&Token::And) {
            parts.push(self.parse_not()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::And(parts) })
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        let position = self.current().position;
        if self.matches(&Token::Not) {
            let inner = self.with_nesting(position, Self::parse_not)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let first = self.parse_unary()?;
        let mut links = Vec::new();
        let mut left = first.clone();
        while let Some(op) = self.comparison_op() {
            self.advance();
            let right = self.parse_unary()?;
            links.push(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right.clone()),
            });
            left = right;
        }
        Ok(match links.len() {
            0 => first,
            1 => links.remove(0),
            _ => Expr::And(links),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        let position = self.current().position;
        if self.matches(&Token::Minus) {
            let inner = self.with_nesting(position, Self::parse_unary)?;
            return Ok(match inner {
                Expr::Literal(Value::Int(i)) if i.checked_neg().is_some() => {
                    Expr::Literal(Value::Int(-i))
                }
                Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let SpannedToken { token, position } = self.current().clone();
        match token {
            Token::Ident(name) => {
                self.advance();
                self.columns.entry(name.to_string()).or_insert(position);
                Ok(Expr::Column(name.to_string()))
            }
            Token::Number(raw) => {
                self.advance();
                parse_number(raw, position).map(Expr::Literal)
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::LParen => {
                self.advance();
                self.with_nesting(position, |parser| {
                    let expr = parser.parse_or()?;
                    parser.expect(&Token::RParen, "`)`")?;
                    Ok(expr)
                })
            }
            other => Err(ConditionError::UnexpectedToken {
                expected: "column, literal or `(`",
                found: other.describe(),
                position,
            }),
        }
    }

    fn comparison_op(&self) -> Option<CompareOp> {
        match self.current().token {
            Token::Eq => Some(CompareOp::Eq),
            Token::Ne => Some(CompareOp::Ne),
            Token::Lt => Some(CompareOp::Lt),
            Token::Le => Some(CompareOp::Le),
            Token::Gt => Some(CompareOp::Gt),
            Token::Ge => Some(CompareOp::Ge),
            _ => None,
        }
    }

    fn with_nesting<T>(
        &mut self,
        position: usize,
        f: impl FnOnce(&mut Self) -> Result<T, ConditionError>,
    ) -> Result<T, ConditionError> {
        let next_depth = self.nesting + 1;
        if next_depth > MAX_NESTING {
            return Err(ConditionError::NestingTooDeep {
                max_depth: MAX_NESTING,
                actual_depth: next_depth,
                position,
            });
        }
        self.nesting = next_depth;
        let result = f(self);
        self.nesting = self.nesting.saturating_sub(1);
        result
    }

    fn expect(&mut self, token: &Token<'_>, expected: &'static str) -> Result<(), ConditionError> {
        if self.matches(token) {
            Ok(())
        } else {
            Err(ConditionError::UnexpectedToken {
                expected,
                found: self.current().token.describe(),
                position: self.current().position,
            })
        }
    }

    fn matches(&mut self, kind: &Token<'_>) -> bool {
        if std::mem::discriminant(&self.current().token) == std::mem::discriminant(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current(&self) -> &SpannedToken<'a> {
        &self.tokens[self.index]
    }

    fn advance(&mut self) {
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
    }
}

fn parse_number(raw: &str, position: usize) -> Result<Value, ConditionError> {
    let invalid = || ConditionError::InvalidNumber {
        raw: raw.to_string(),
        position,
    };
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        raw.parse().map(Value::Int).map_err(|_| invalid())
    } else {
        raw.parse().map(Value::Float).map_err(|_| invalid())
    }
}
