use thiserror::Error;

/// Failures of the arrival rule, either while parsing its text or while
/// evaluating it during a run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleRuleError {
    #[error("Rule is empty.")]
    Empty,
    #[error("Rule is longer than {max} characters.")]
    TooLong { max: usize },
    #[error("Unexpected character '{ch}' at offset {offset}.")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("Invalid number literal '{literal}'.")]
    InvalidNumber { literal: String },
    #[error("Unexpected token '{found}' at offset {offset}, expected {expected}.")]
    UnexpectedToken {
        found: String,
        offset: usize,
        expected: &'static str,
    },
    #[error("Unexpected end of rule, expected {expected}.")]
    UnexpectedEnd { expected: &'static str },
    #[error("Unknown name '{name}'. Only the rule variable '{var}' is in scope.")]
    UnknownName { name: String, var: String },
    #[error("Unknown function '{name}'.")]
    UnknownFunction { name: String },
    #[error("Function '{name}' takes {expected} argument(s), got {got}.")]
    Arity {
        name: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("Rule nesting exceeds depth {max}.")]
    TooDeep { max: usize },
    #[error("Rule has more than {max} nodes.")]
    TooLarge { max: usize },
    #[error("Expected a number but got {found} at t={at}s.")]
    TypeMismatch { found: &'static str, at: String },
    #[error("Division by zero at t={at}s.")]
    DivisionByZero { at: String },
    #[error("Rule produced a non-finite value at t={at}s.")]
    NonFinite { at: String },
    #[error("Rule produced a negative count {value} at t={at}s.")]
    Negative { value: String, at: String },
    #[error("Cumulative count decreased from {previous} to {current} at t={at}s.")]
    Decreasing {
        previous: u64,
        current: u64,
        at: String,
    },
}
