//! Functions exported to host languages through uniffi.

use std::collections::HashMap;

use thiserror::Error;

use crate::error::{FormulaError, ParameterError, TcoError};
use crate::formula::{self, FunctionInfo};
use crate::models::{Calculation, CalculationStatus, Category, Parameter};
use crate::parameters::{ParameterStore, ValueMode};
use crate::recalc::{recalculate, DEFAULT_MAX_FORMULA_LEN};
use crate::tco::{self, TcoComparison, TcoInput};

#[derive(Debug, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum FfiError {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Tco(#[from] TcoError),
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct ParameterValue {
    pub name: String,
    pub value: f64,
    pub test_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct CalculationInput {
    pub name: String,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct CalculationOutput {
    pub name: String,
    pub result: Option<f64>,
    pub error: Option<String>,
    pub status: CalculationStatus,
    pub level: u32,
    /// Formatted result, or "Error"
    pub display_value: String,
}

impl From<&Calculation> for CalculationOutput {
    fn from(calc: &Calculation) -> Self {
        Self {
            name: calc.name.clone(),
            result: calc.result,
            error: calc.error.clone(),
            status: calc.status,
            level: calc.level,
            display_value: calc.display_value(),
        }
    }
}

fn parse(expression: &str) -> Result<formula::Expr, FormulaError> {
    formula::parse_bounded(expression, DEFAULT_MAX_FORMULA_LEN)
}

#[uniffi::export]
pub fn validate_formula(expression: String) -> Result<(), FfiError> {
    parse(&expression)?;
    Ok(())
}

/// Names a formula reads, sorted.
#[uniffi::export]
pub fn formula_references(expression: String) -> Result<Vec<String>, FfiError> {
    Ok(parse(&expression)?.references().into_iter().collect())
}

#[uniffi::export]
pub fn compute_formula(expression: String, variables: HashMap<String, f64>) -> Result<f64, FfiError> {
    let expr = parse(&expression)?;
    Ok(formula::evaluate_number(&expr, &variables)?)
}

#[uniffi::export]
pub fn formula_functions() -> Vec<FunctionInfo> {
    formula::supported_functions()
}

/// Evaluates a set of calculations against parameter values in one pass.
/// Per-calculation failures are reported in the output, not as an error.
#[uniffi::export]
pub fn evaluate_calculations(
    parameters: Vec<ParameterValue>,
    calculations: Vec<CalculationInput>,
    test_mode: bool,
) -> Result<Vec<CalculationOutput>, FfiError> {
    let category = Category::default();
    let store = ParameterStore::from_parameters(
        parameters
            .into_iter()
            .map(|p| {
                let mut parameter = Parameter::new(p.name, p.value, category.clone());
                parameter.test_value = p.test_value;
                parameter
            })
            .collect(),
    )?;
    let mut calcs: Vec<Calculation> = calculations
        .into_iter()
        .map(|c| Calculation::new(c.name, c.formula, category.clone()))
        .collect();

    let mode = if test_mode {
        ValueMode::Test
    } else {
        ValueMode::Live
    };
    recalculate(&store, &mut calcs, mode);
    Ok(calcs.iter().map(CalculationOutput::from).collect())
}

#[uniffi::export]
pub fn default_tco_input() -> TcoInput {
    TcoInput::default()
}

#[uniffi::export]
pub fn compare_tco(input: TcoInput) -> Result<TcoComparison, FfiError> {
    Ok(tco::compute_tco(&input)?)
}
