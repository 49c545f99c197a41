//! Errors for the expression sub-language.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExprError>;

/// Every failure mode of parsing or evaluating a playbook expression.
///
/// Per the evaluator contract, none of these ever panic or propagate as Rust
/// panics — callers (condition/action evaluation) catch `ExprError` and turn
/// it into "rule is false" or "action is a no-op", logging the expression and
/// a snapshot of what failed to resolve.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("unresolved name: {0}")]
    UnresolvedName(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{func} expects {expected} argument(s), got {got}")]
    WrongArity {
        func: String,
        expected: usize,
        got: usize,
    },
    #[error("iff() first argument must be a single comparison")]
    IffRequiresComparison,
    #[error("unknown comparison operator: {0}")]
    UnknownOperator(String),
    #[error("trailing input after expression: {0}")]
    TrailingInput(String),
}
