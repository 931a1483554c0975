pub mod builder;
pub mod config;
pub mod error;
pub mod ffi;
pub mod formula;
pub mod graph;
pub mod idgen;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod parameters;
pub mod recalc;
pub mod sqlite;
pub mod storage;
pub mod tco;

uniffi::setup_scaffolding!();

pub use builder::{BuilderStep, SolutionBuilder};
pub use config::{Config, ConfigError};
pub use error::{BuilderError, FormulaError, ParameterError, TcoError};
pub use graph::{CycleError, DependencyGraph};
pub use models::{
    Address, BillingDetails, Calculation, CalculationId, CalculationStatus, Category, Company,
    CompanyId, DisplayType, InterfaceKind, NewUser, Parameter, ParameterId, ParameterOption,
    Product, ProductId, Solution, SolutionId, SolutionStatus, User, UserId, UserInterface,
    UserProfileUpdate, UserRole, ValueRange,
};
pub use parameters::{ParameterStore, ValueMode};
pub use recalc::{recalculate, RecalcReport, Recalculator};
pub use sqlite::SqliteStorage;
pub use storage::{SortDirection, Storage, StorageError, UserQuery, UserSortField};
pub use tco::{compute_tco, TcoComparison, TcoInput, TcoScenario};
