//! Condition parse and evaluation errors

use thiserror::Error;

/// Errors raised while parsing, binding or evaluating a condition.
///
/// Positions are byte offsets into the condition string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    EmptyInput,

    #[error("condition exceeds size limit: {actual_bytes} bytes (max {max_bytes})")]
    InputTooLarge { max_bytes: usize, actual_bytes: usize },

    #[error("condition nesting too deep at {position}: depth {actual_depth} (max {max_depth})")]
    NestingTooDeep {
        max_depth: usize,
        actual_depth: usize,
        position: usize,
    },

    #[error("unexpected {found} at {position}, expected {expected}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },

    #[error("invalid number {raw:?} at {position}")]
    InvalidNumber { raw: String, position: usize },

    #[error("unterminated string starting at {position}")]
    UnterminatedString { position: usize },

    #[error("unexpected trailing input at {position}")]
    TrailingInput { position: usize },

    #[error("unknown column {name:?} at {position}")]
    UnknownColumn { name: String, position: usize },

    #[error("cannot evaluate {op}: {detail}")]
    Evaluation { op: &'static str, detail: String },
}

impl From<ConditionError> for sampletable_common::Error {
    fn from(err: ConditionError) -> Self {
        Self::Condition(err.to_string())
    }
}
