use std::collections::HashMap;

use crate::error::FormulaError;
use crate::formula::ast::{BinaryOp, Expr, UnaryOp};

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Boolean(bool),
}

impl Value {
    pub fn as_number(&self) -> Result<f64, FormulaError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, FormulaError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
        }
    }
}

/// Trait for providing variable values during evaluation.
pub trait VariableProvider {
    fn get(&self, name: &str) -> Option<f64>;
}

impl<F> VariableProvider for F
where
    F: Fn(&str) -> Option<f64>,
{
    fn get(&self, name: &str) -> Option<f64> {
        self(name)
    }
}

impl VariableProvider for HashMap<String, f64> {
    fn get(&self, name: &str) -> Option<f64> {
        HashMap::get(self, name).copied()
    }
}

/// Evaluate an expression with the given variable provider.
///
/// `and`, `or`, the ternary and `if(...)` only evaluate the branch they need,
/// so `if(x > 0, total / x, 0)` is safe when `x` is zero.
pub fn evaluate<V: VariableProvider + ?Sized>(
    expr: &Expr,
    vars: &V,
) -> Result<Value, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Boolean(b) => Ok(Value::Boolean(*b)),
        Expr::Variable(name) => vars
            .get(name)
            .map(Value::Number)
            .ok_or_else(|| FormulaError::UnknownVariable(name.clone())),
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            if !evaluate(left, vars)?.as_bool()? {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(evaluate(right, vars)?.as_bool()?))
        }
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            if evaluate(left, vars)?.as_bool()? {
                return Ok(Value::Boolean(true));
            }
            Ok(Value::Boolean(evaluate(right, vars)?.as_bool()?))
        }
        Expr::Binary { op, left, right } => {
            let left_val = evaluate(left, vars)?;
            let right_val = evaluate(right, vars)?;
            evaluate_binary(*op, left_val, right_val)
        }
        Expr::Unary { op, expr } => {
            let val = evaluate(expr, vars)?;
            evaluate_unary(*op, val)
        }
        Expr::FunctionCall { name, args } if name.eq_ignore_ascii_case("if") => {
            check_arg_count("if", args.len(), 3)?;
            if evaluate(&args[0], vars)?.is_truthy() {
                evaluate(&args[1], vars)
            } else {
                evaluate(&args[2], vars)
            }
        }
        Expr::FunctionCall { name, args } => {
            let arg_values: Result<Vec<Value>, _> =
                args.iter().map(|a| evaluate(a, vars)).collect();
            evaluate_function(name, arg_values?)
        }
        Expr::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            let cond = evaluate(condition, vars)?;
            if cond.is_truthy() {
                evaluate(then_expr, vars)
            } else {
                evaluate(else_expr, vars)
            }
        }
    }
}

fn evaluate_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, FormulaError> {
    let l = left.as_number()?;
    let r = right.as_number()?;
    match op {
        BinaryOp::Add => Ok(Value::Number(l + r)),
        BinaryOp::Sub => Ok(Value::Number(l - r)),
        BinaryOp::Mul => Ok(Value::Number(l * r)),
        BinaryOp::Div => {
            if r == 0.0 {
                Err(FormulaError::DivisionByZero)
            } else {
                Ok(Value::Number(l / r))
            }
        }
        BinaryOp::Pow => Ok(Value::Number(l.powf(r))),
        BinaryOp::Gt => Ok(Value::Boolean(l > r)),
        BinaryOp::Lt => Ok(Value::Boolean(l < r)),
        BinaryOp::Gte => Ok(Value::Boolean(l >= r)),
        BinaryOp::Lte => Ok(Value::Boolean(l <= r)),
        BinaryOp::Eq => Ok(Value::Boolean((l - r).abs() < f64::EPSILON)),
        BinaryOp::Neq => Ok(Value::Boolean((l - r).abs() >= f64::EPSILON)),
        BinaryOp::And => Ok(Value::Boolean(l != 0.0 && r != 0.0)),
        BinaryOp::Or => Ok(Value::Boolean(l != 0.0 || r != 0.0)),
    }
}

fn evaluate_unary(op: UnaryOp, val: Value) -> Result<Value, FormulaError> {
    match op {
        UnaryOp::Neg => {
            let n = val.as_number()?;
            Ok(Value::Number(-n))
        }
        UnaryOp::Not => {
            let b = val.as_bool()?;
            Ok(Value::Boolean(!b))
        }
    }
}

fn check_arg_count(function: &str, got: usize, expected: usize) -> Result<(), FormulaError> {
    if got == expected {
        Ok(())
    } else {
        Err(FormulaError::InvalidArgCount {
            function: function.to_string(),
            expected: expected.to_string(),
            got,
        })
    }
}

fn unary_math(name: &str, args: &[Value], f: fn(f64) -> f64) -> Result<Value, FormulaError> {
    check_arg_count(name, args.len(), 1)?;
    Ok(Value::Number(f(args[0].as_number()?)))
}

fn evaluate_function(name: &str, args: Vec<Value>) -> Result<Value, FormulaError> {
    match name.to_lowercase().as_str() {
        lowered @ ("min" | "max") => {
            if args.is_empty() {
                return Err(FormulaError::InvalidArgCount {
                    function: lowered.to_string(),
                    expected: "at least 1".to_string(),
                    got: 0,
                });
            }
            let mut numbers = Vec::with_capacity(args.len());
            for arg in &args {
                numbers.push(arg.as_number()?);
            }
            let folded = if lowered == "min" {
                numbers.into_iter().fold(f64::INFINITY, f64::min)
            } else {
                numbers.into_iter().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(Value::Number(folded))
        }
        "round" => {
            check_arg_count("round", args.len(), 2)?;
            let x = args[0].as_number()?;
            let decimals = args[1].as_number()? as i32;
            let factor = 10_f64.powi(decimals);
            Ok(Value::Number((x * factor).round() / factor))
        }
        "pow" => {
            check_arg_count("pow", args.len(), 2)?;
            let base = args[0].as_number()?;
            let exponent = args[1].as_number()?;
            Ok(Value::Number(base.powf(exponent)))
        }
        "abs" => unary_math("abs", &args, f64::abs),
        "sqrt" => unary_math("sqrt", &args, f64::sqrt),
        "floor" => unary_math("floor", &args, f64::floor),
        "ceil" => unary_math("ceil", &args, f64::ceil),
        "exp" => unary_math("exp", &args, f64::exp),
        "ln" => unary_math("ln", &args, f64::ln),
        "log10" => unary_math("log10", &args, f64::log10),
        _ => Err(FormulaError::UnknownFunction(name.to_string())),
    }
}

/// Information about a supported function.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FunctionInfo {
    pub name: String,
    pub signature: String,
    pub description: String,
    /// `None` for variadic functions.
    pub arg_count: Option<u32>,
}

fn info(name: &str, signature: &str, description: &str, arg_count: Option<u32>) -> FunctionInfo {
    FunctionInfo {
        name: name.to_string(),
        signature: signature.to_string(),
        description: description.to_string(),
        arg_count,
    }
}

/// List of supported built-in functions.
pub fn supported_functions() -> Vec<FunctionInfo> {
    vec![
        info("min", "min(a, b, ...)", "Returns the smallest argument", None),
        info("max", "max(a, b, ...)", "Returns the largest argument", None),
        info("round", "round(x, n)", "Rounds x to n decimal places", Some(2)),
        info("pow", "pow(x, y)", "Raises x to the power y", Some(2)),
        info("abs", "abs(x)", "Returns the absolute value of x", Some(1)),
        info("sqrt", "sqrt(x)", "Returns the square root of x", Some(1)),
        info("floor", "floor(x)", "Rounds x down to the nearest integer", Some(1)),
        info("ceil", "ceil(x)", "Rounds x up to the nearest integer", Some(1)),
        info("exp", "exp(x)", "Returns e raised to the power x", Some(1)),
        info("ln", "ln(x)", "Returns the natural logarithm of x", Some(1)),
        info("log10", "log10(x)", "Returns the base-10 logarithm of x", Some(1)),
        info("if", "if(cond, a, b)", "Returns a if cond is true, otherwise b", Some(3)),
    ]
}
