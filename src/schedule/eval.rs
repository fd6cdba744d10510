#![expect(
    clippy::float_arithmetic,
    clippy::float_cmp,
    reason = "arrival rules are real-valued expressions over elapsed seconds"
)]

use crate::error::ScheduleRuleError;

use super::parser::{BinOp, CmpOp, Expr, Func};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Value {
    Num(f64),
    Bool(bool),
    Done,
}

impl Value {
    const fn type_name(self) -> &'static str {
        match self {
            Value::Num(_) => "a number",
            Value::Bool(_) => "a boolean",
            Value::Done => "None",
        }
    }
}

pub(super) struct Evaluator {
    t: f64,
}

impl Evaluator {
    pub(super) const fn new(t: f64) -> Self {
        Self { t }
    }

    fn at(&self) -> String {
        format!("{}", self.t)
    }

    fn number(&self, value: Value) -> Result<f64, ScheduleRuleError> {
        match value {
            Value::Num(number) => Ok(number),
            Value::Bool(_) | Value::Done => Err(ScheduleRuleError::TypeMismatch {
                found: value.type_name(),
                at: self.at(),
            }),
        }
    }

    fn finite(&self, value: f64) -> Result<Value, ScheduleRuleError> {
        if value.is_finite() {
            Ok(Value::Num(value))
        } else {
            Err(ScheduleRuleError::NonFinite { at: self.at() })
        }
    }

    fn truthy(&self, value: Value) -> Result<bool, ScheduleRuleError> {
        match value {
            Value::Bool(flag) => Ok(flag),
            Value::Num(number) => Ok(number != 0.0),
            Value::Done => Err(ScheduleRuleError::TypeMismatch {
                found: value.type_name(),
                at: self.at(),
            }),
        }
    }

    pub(super) fn eval(&self, expr: &Expr) -> Result<Value, ScheduleRuleError> {
        match expr {
            Expr::Num(value) => Ok(Value::Num(*value)),
            Expr::Bool(flag) => Ok(Value::Bool(*flag)),
            Expr::Var => Ok(Value::Num(self.t)),
            Expr::Done => Ok(Value::Done),
            Expr::Neg(inner) => {
                let value = self.number(self.eval(inner)?)?;
                Ok(Value::Num(-value))
            }
            Expr::Not(inner) => {
                let value = self.eval(inner)?;
                Ok(Value::Bool(!self.truthy(value)?))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.number(self.eval(lhs)?)?;
                let rhs = self.number(self.eval(rhs)?)?;
                self.binary(*op, lhs, rhs)
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.number(self.eval(lhs)?)?;
                let rhs = self.number(self.eval(rhs)?)?;
                Ok(Value::Bool(compare(*op, lhs, rhs)))
            }
            Expr::And(lhs, rhs) => {
                let left = self.eval(lhs)?;
                if !self.truthy(left)? {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval(rhs)?;
                Ok(Value::Bool(self.truthy(right)?))
            }
            Expr::Or(lhs, rhs) => {
                let left = self.eval(lhs)?;
                if self.truthy(left)? {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval(rhs)?;
                Ok(Value::Bool(self.truthy(right)?))
            }
            Expr::Cond {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.eval(cond)?;
                if self.truthy(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { func, args } => self.call(*func, args),
        }
    }

    fn binary(&self, op: BinOp, lhs: f64, rhs: f64) -> Result<Value, ScheduleRuleError> {
        let result = match op {
            BinOp::Add => lhs + rhs,
            BinOp::Sub => lhs - rhs,
            BinOp::Mul => lhs * rhs,
            BinOp::Div => {
                self.nonzero(rhs)?;
                lhs / rhs
            }
            BinOp::FloorDiv => {
                self.nonzero(rhs)?;
                (lhs / rhs).floor()
            }
            BinOp::Rem => {
                self.nonzero(rhs)?;
                // Result takes the sign of the divisor.
                let rem = lhs % rhs;
                if rem != 0.0 && (rem < 0.0) != (rhs < 0.0) {
                    rem + rhs
                } else {
                    rem
                }
            }
            BinOp::Pow => lhs.powf(rhs),
        };
        self.finite(result)
    }

    fn nonzero(&self, divisor: f64) -> Result<(), ScheduleRuleError> {
        if divisor == 0.0 {
            return Err(ScheduleRuleError::DivisionByZero { at: self.at() });
        }
        Ok(())
    }

    fn call(&self, func: Func, args: &[Expr]) -> Result<Value, ScheduleRuleError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.number(self.eval(arg)?)?);
        }
        let result = match (func, values.as_slice()) {
            (Func::Int, [value]) => value.trunc(),
            (Func::Floor, [value]) => value.floor(),
            (Func::Ceil, [value]) => value.ceil(),
            (Func::Round, [value]) => value.round_ties_even(),
            (Func::Abs, [value]) => value.abs(),
            (Func::Min, [first, rest @ ..]) => rest.iter().copied().fold(*first, f64::min),
            (Func::Max, [first, rest @ ..]) => rest.iter().copied().fold(*first, f64::max),
            (func, other) => {
                return Err(ScheduleRuleError::Arity {
                    name: func.name(),
                    expected: "a valid number of",
                    got: other.len(),
                });
            }
        };
        self.finite(result)
    }
}

fn compare(op: CmpOp, lhs: f64, rhs: f64) -> bool {
    match op {
        CmpOp::Lt => lhs < rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Ge => lhs >= rhs,
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
    }
}
