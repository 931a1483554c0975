//! Formula engine for solution calculations.
//!
//! This module provides parsing, validation, and evaluation of formula expressions
//! that reference parameters and other calculations by name.
//!
//! # Supported Grammar
//!
//! - Arithmetic: `+ - * / ^ ( )`
//! - Comparison: `> < >= <= == !=`
//! - Boolean: `and or not`
//! - Ternary: `cond ? a : b`
//! - Names: `it_load_kw`, or `[IT Load]` for names that contain spaces
//! - Functions: see [`supported_functions`]
//!
//! # Example
//!
//! ```
//! use solutions_compute::formula::{validate, compute};
//!
//! let formula = "it_load_kw * (ppue - 1)";
//! validate(formula).expect("Formula should be valid");
//!
//! let vars = |name: &str| match name {
//!     "it_load_kw" => Some(400.0),
//!     "ppue" => Some(1.25),
//!     _ => None,
//! };
//! let result = compute(formula, &vars).expect("Should compute");
//! assert!((result - 100.0).abs() < f64::EPSILON);
//! ```

pub mod ast;
pub mod evaluator;
pub mod parser;

use std::collections::BTreeSet;

pub use ast::{is_bare_identifier, BinaryOp, Expr, UnaryOp};
pub use evaluator::{evaluate, supported_functions, FunctionInfo, Value, VariableProvider};
pub use parser::parse;

use crate::error::FormulaError;

/// Validate a formula expression without evaluating it.
///
/// This checks that the formula parses correctly but does not validate
/// that all variables exist (as that depends on context).
pub fn validate(expression: &str) -> Result<(), FormulaError> {
    parse(expression)?;
    Ok(())
}

/// Validate a formula and check that all variables are available.
pub fn validate_with_variables(expression: &str, available: &[&str]) -> Result<(), FormulaError> {
    let ast = parse(expression)?;
    match ast
        .references()
        .into_iter()
        .find(|name| !available.contains(&name.as_str()))
    {
        Some(missing) => Err(FormulaError::UnknownVariable(missing)),
        None => Ok(()),
    }
}

/// Parse a formula, refusing expressions longer than `max_len` characters.
pub fn parse_bounded(expression: &str, max_len: usize) -> Result<Expr, FormulaError> {
    if expression.chars().count() > max_len {
        return Err(FormulaError::TooLong { max: max_len });
    }
    parse(expression)
}

/// Names referenced by a formula.
pub fn references(expression: &str) -> Result<BTreeSet<String>, FormulaError> {
    Ok(parse(expression)?.references())
}

/// Rewrite a formula so references to `from` read `to`.
///
/// Formulas that do not mention `from` are returned untouched, so their
/// original spacing survives.
pub fn rename_in_formula(expression: &str, from: &str, to: &str) -> Result<String, FormulaError> {
    let mut ast = parse(expression)?;
    if ast.rename_variable(from, to) == 0 {
        return Ok(expression.to_string());
    }
    Ok(ast.to_string())
}

/// Evaluate an already parsed expression to a finite number.
pub fn evaluate_number<V: VariableProvider + ?Sized>(
    expr: &Expr,
    vars: &V,
) -> Result<f64, FormulaError> {
    let result = evaluate(expr, vars)?.as_number()?;
    if result.is_finite() {
        Ok(result)
    } else {
        Err(FormulaError::NonFinite)
    }
}

/// Compute a formula's numeric result given a variable provider.
pub fn compute<V: VariableProvider>(expression: &str, vars: &V) -> Result<f64, FormulaError> {
    let ast = parse(expression)?;
    evaluate_number(&ast, vars)
}
