use thiserror::Error;

/// Error type for formula parsing and evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("parse error at position {position}: {message}")]
    ParseError { position: usize, message: String },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid argument count for {function}: expected {expected}, got {got}")]
    InvalidArgCount {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("result is not a finite number")]
    NonFinite,

    #[error("formula exceeds {max} characters")]
    TooLong { max: usize },

    #[error("formula nests deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("empty expression")]
    EmptyExpression,
}

/// Errors raised by the parameter store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("name already in use: {0}")]
    DuplicateName(String),

    #[error("parameter not found: {0}")]
    NotFound(String),

    #[error("value {value} is not one of the options of {name}")]
    NotAnOption { name: String, value: f64 },

    #[error("value {value} is outside the range {min}..={max} of {name}")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("value for {0} is not a finite number")]
    NonFinite(String),
}

/// Errors raised by the solution builder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuilderError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error("calculation not found: {0}")]
    CalculationNotFound(String),

    #[error("category not found: {0}")]
    CategoryNotFound(String),

    #[error("category name is empty")]
    EmptyCategoryName,

    #[error("category already exists: {0}")]
    DuplicateCategory(String),

    #[error("invalid color '{0}': expected #RRGGBB")]
    InvalidColor(String),

    #[error("{name} is still used by: {}", .used_by.join(", "))]
    InUse { name: String, used_by: Vec<String> },

    #[error("formula of {0} references itself")]
    SelfReference(String),

    #[error("step {step} is incomplete: {reason}")]
    StepIncomplete { step: String, reason: String },

    #[error("step {0} has not been reached yet")]
    StepNotReached(String),
}

/// Errors raised by the TCO calculator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TcoError {
    #[error("horizon must be between 1 and {max} years, got {got}")]
    InvalidHorizon { max: u32, got: u32 },

    #[error("{field} must be a non-negative finite number, got {value}")]
    InvalidAmount { field: String, value: f64 },

    #[error("pPUE of {scenario} must be at least 1.0, got {value}")]
    InvalidPpue { scenario: String, value: f64 },
}
