//! Arrival rules and the virtual-clock schedule built on them.
//!
//! A rule maps elapsed seconds to the cumulative number of requests that
//! should have been sent by then, or `None` once the workload is over. Rules
//! are parsed by a small recursive-descent grammar and evaluated by an
//! interpreter with no access to the host.

mod eval;
mod evaluator;
mod lexer;
mod parser;


use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::ScheduleRuleError;

pub use evaluator::{ArrivalSchedule, ScheduleSettings, ScheduleStep};

/// A parsed arrival rule.
#[derive(Clone)]
pub struct ArrivalRule {
    source: String,
    var: String,
    expr: parser::Expr,
}

impl ArrivalRule {
    /// Parses rule text such as `lambda t: int(t / 0.1 + 1) if t < 30 else None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the text is empty, too long, too deep, too large
    /// or not accepted by the grammar.
    pub fn parse(source: &str) -> Result<Self, ScheduleRuleError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(ScheduleRuleError::Empty);
        }
        if trimmed.len() > parser::MAX_RULE_LEN {
            return Err(ScheduleRuleError::TooLong {
                max: parser::MAX_RULE_LEN,
            });
        }
        let tokens = lexer::tokenize(trimmed)?;
        let parsed = parser::parse(tokens)?;
        Ok(Self {
            source: trimmed.to_owned(),
            var: parsed.var,
            expr: parsed.expr,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the free variable, `t` unless the rule declares its own.
    #[must_use]
    pub fn variable(&self) -> &str {
        &self.var
    }

    /// Cumulative request count at `elapsed`, `None` once the rule ends.
    ///
    /// Fractional counts are floored.
    ///
    /// # Errors
    ///
    /// Returns an error when the rule yields a boolean, a negative or
    /// non-finite number, or divides by zero.
    pub fn cumulative_at(&self, elapsed: Duration) -> Result<Option<u64>, ScheduleRuleError> {
        let t = elapsed.as_secs_f64();
        let evaluator = eval::Evaluator::new(t);
        match evaluator.eval(&self.expr)? {
            eval::Value::Done => Ok(None),
            eval::Value::Bool(_) => Err(ScheduleRuleError::TypeMismatch {
                found: "a boolean",
                at: t.to_string(),
            }),
            eval::Value::Num(value) => {
                if value < 0.0 {
                    return Err(ScheduleRuleError::Negative {
                        value: value.to_string(),
                        at: t.to_string(),
                    });
                }
                if !value.is_finite() {
                    return Err(ScheduleRuleError::NonFinite { at: t.to_string() });
                }
                Ok(Some(floor_count(value)))
            }
        }
    }
}

// Finite and non-negative here; `as` saturates at `u64::MAX`.
fn floor_count(value: f64) -> u64 {
    value.floor() as u64
}

impl fmt::Debug for ArrivalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArrivalRule").field(&self.source).finish()
    }
}

impl PartialEq for ArrivalRule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for ArrivalRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}
