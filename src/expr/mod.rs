//! Expression language of rule filters and aggregate APPLY / FILTER
//! steps: arithmetic, comparisons, boolean logic, `@field` references and
//! a small function library.

pub mod functions;
pub mod parser;

use std::fmt;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;

pub use parser::parse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Property(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Source of `@name` values during evaluation.
pub trait ExprEnv {
    fn property(&self, name: &str) -> Option<Value>;
}

impl<F> ExprEnv for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn property(&self, name: &str) -> Option<Value> {
        self(name)
    }
}

impl Expr {
    pub fn eval(&self, env: &dyn ExprEnv) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Property(name) => Ok(env.property(name).unwrap_or(Value::Null)),
            Expr::Neg(inner) => {
                let v = inner.eval(env)?;
                Ok(v.as_number().map(|n| Value::Number(-n)).unwrap_or(Value::Null))
            }
            Expr::Not(inner) => Ok(bool_value(!inner.eval(env)?.truthy())),
            Expr::Binary(op, lhs, rhs) => {
                // Short-circuit boolean operators
                match op {
                    BinaryOp::And => {
                        let l = lhs.eval(env)?;
                        if !l.truthy() {
                            return Ok(bool_value(false));
                        }
                        return Ok(bool_value(rhs.eval(env)?.truthy()));
                    }
                    BinaryOp::Or => {
                        let l = lhs.eval(env)?;
                        if l.truthy() {
                            return Ok(bool_value(true));
                        }
                        return Ok(bool_value(rhs.eval(env)?.truthy()));
                    }
                    _ => {}
                }
                let l = lhs.eval(env)?;
                let r = rhs.eval(env)?;
                binary(*op, &l, &r)
            }
            Expr::Call(name, args) => {
                if name == "exists" {
                    // Evaluates presence, not value
                    return match args.as_slice() {
                        [Expr::Property(p)] => Ok(bool_value(env.property(p).map(|v| !v.is_null()).unwrap_or(false))),
                        _ => Err(Error::new(ErrorKind::BadParameter, "exists() takes one property")),
                    };
                }
                let values: Vec<Value> = args.iter().map(|a| a.eval(env)).collect::<Result<_>>()?;
                functions::call(name, &values)
            }
        }
    }

    /// Property names referenced anywhere in the expression.
    pub fn properties(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_properties(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_properties(&self, out: &mut Vec<String>) {
        match self {
            Expr::Property(p) => out.push(p.clone()),
            Expr::Neg(e) | Expr::Not(e) => e.collect_properties(out),
            Expr::Binary(_, l, r) => {
                l.collect_properties(out);
                r.collect_properties(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_properties(out)),
            Expr::Literal(_) => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Str(s)) => write!(f, "\"{}\"", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Property(p) => write!(f, "@{}", p),
            Expr::Neg(e) => write!(f, "-({})", e),
            Expr::Not(e) => write!(f, "!({})", e),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::Call(name, args) => {
                let parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, parts.join(", "))
            }
        }
    }
}

pub(crate) fn bool_value(b: bool) -> Value {
    Value::Number(if b { 1.0 } else { 0.0 })
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use BinaryOp::*;
    match op {
        Add | Sub | Mul | Div | Mod | Pow => {
            let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
                return Ok(Value::Null);
            };
            let v = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                Mod => {
                    if b == 0.0 {
                        return Ok(Value::Null);
                    }
                    (a as i64 % b as i64) as f64
                }
                _ => a.powf(b),
            };
            Ok(if v.is_nan() { Value::Null } else { Value::Number(v) })
        }
        Eq | Ne | Lt | Le | Gt | Ge => {
            let ord = compare(l, r);
            let b = match op {
                Eq => ord == Some(std::cmp::Ordering::Equal),
                Ne => ord != Some(std::cmp::Ordering::Equal),
                Lt => ord == Some(std::cmp::Ordering::Less),
                Le => matches!(ord, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
                Gt => ord == Some(std::cmp::Ordering::Greater),
                _ => matches!(ord, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
            };
            Ok(bool_value(b))
        }
        And | Or => unreachable_op(op),
    }
}

fn unreachable_op(op: BinaryOp) -> Result<Value> {
    Err(Error::internal(format!("operator {} evaluated out of band", op.symbol())))
}

/// Numbers compare numerically, a numeric string counts as a number when
/// the other side is one. Null only equals null.
fn compare(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(_), _) | (_, Value::Number(_)) => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(l.to_string().cmp(&r.to_string())),
        },
        _ => Some(l.to_string().cmp(&r.to_string())),
    }
}
