use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::idgen::generate_id;

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generates a fresh ID derived from `seed`.
            pub fn generate(seed: &str) -> Self {
                Self(generate_id($prefix, seed))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(CompanyId, "cmp");
id_type!(UserId, "usr");
id_type!(SolutionId, "sol");
id_type!(ProductId, "prd");
id_type!(ParameterId, "par");
id_type!(CalculationId, "calc");

/// Color used for categories nobody picked a color for.
pub const DEFAULT_CATEGORY_COLOR: &str = "#64748B";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
}

impl Category {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }

    pub fn same_name(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name.trim())
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::new("General", DEFAULT_CATEGORY_COLOR)
    }
}

/// How a parameter is rendered in the builder and configurator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    #[default]
    Simple,
    Dropdown,
    Range,
    Filter,
}

/// Whether end users may edit, only see, or not see a parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    #[default]
    Input,
    Static,
    NotViewable,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInterface {
    #[serde(rename = "type")]
    pub kind: InterfaceKind,
    pub is_advanced: bool,
}

/// One entry of a dropdown parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterOption {
    pub label: String,
    pub value: f64,
}

/// Bounds of a range parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub step: Option<f64>,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParameterId,
    pub name: String,
    pub category: Category,
    /// Default value defined by the solution author.
    pub value: f64,
    /// Value chosen by the user, replacing the default.
    #[serde(default)]
    pub override_value: Option<f64>,
    /// Value used while the author test-drives the solution.
    #[serde(default)]
    pub test_value: Option<f64>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub display_type: DisplayType,
    #[serde(default)]
    pub user_interface: UserInterface,
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub options: Vec<ParameterOption>,
    #[serde(default)]
    pub range: Option<ValueRange>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64, category: Category) -> Self {
        let name = name.into();
        Self {
            id: ParameterId::generate(&name),
            name,
            category,
            value,
            override_value: None,
            test_value: None,
            unit: String::new(),
            description: None,
            display_type: DisplayType::Simple,
            user_interface: UserInterface::default(),
            output: false,
            options: Vec::new(),
            range: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_interface(mut self, kind: InterfaceKind, is_advanced: bool) -> Self {
        self.user_interface = UserInterface { kind, is_advanced };
        self
    }

    pub fn with_options(mut self, options: Vec<ParameterOption>) -> Self {
        self.display_type = DisplayType::Dropdown;
        self.options = options;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64, step: Option<f64>) -> Self {
        self.display_type = DisplayType::Range;
        self.range = Some(ValueRange { min, max, step });
        self
    }

    pub fn as_output(mut self) -> Self {
        self.output = true;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum CalculationStatus {
    Valid,
    Error,
    #[default]
    Pending,
}

/// Text shown in place of a result when a formula fails.
pub const ERROR_SENTINEL: &str = "Error";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub id: CalculationId,
    pub name: String,
    pub formula: String,
    #[serde(default)]
    pub result: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub units: String,
    pub category: Category,
    #[serde(default)]
    pub status: CalculationStatus,
    #[serde(default)]
    pub output: bool,
    #[serde(default = "default_true")]
    pub display_result: bool,
    /// Dependency depth: 1 when only parameters are read.
    #[serde(default)]
    pub level: u32,
}

fn default_true() -> bool {
    true
}

impl Calculation {
    pub fn new(name: impl Into<String>, formula: impl Into<String>, category: Category) -> Self {
        let name = name.into();
        Self {
            id: CalculationId::generate(&name),
            name,
            formula: formula.into(),
            result: None,
            error: None,
            units: String::new(),
            category,
            status: CalculationStatus::Pending,
            output: false,
            display_result: true,
            level: 0,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn as_output(mut self) -> Self {
        self.output = true;
        self
    }

    /// The result as shown in the calculations table.
    pub fn display_value(&self) -> String {
        match (self.status, self.result) {
            (CalculationStatus::Valid, Some(result)) => format!("{result}"),
            (CalculationStatus::Error, _) => ERROR_SENTINEL.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    #[default]
    Draft,
    PendingReview,
    Approved,
    Rejected,
}

impl SolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolutionStatus::Draft => "draft",
            SolutionStatus::PendingReview => "pending_review",
            SolutionStatus::Approved => "approved",
            SolutionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(SolutionStatus::Draft),
            "pending_review" => Some(SolutionStatus::PendingReview),
            "approved" => Some(SolutionStatus::Approved),
            "rejected" => Some(SolutionStatus::Rejected),
            _ => None,
        }
    }

    /// Authors may only change or submit solutions nobody is reviewing.
    pub fn is_editable(&self) -> bool {
        matches!(self, SolutionStatus::Draft | SolutionStatus::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub id: SolutionId,
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: SolutionStatus,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub calculations: Vec<Calculation>,
    #[serde(default)]
    pub product_ids: Vec<ProductId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Solution {
    pub fn new(company_id: CompanyId, name: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: SolutionId::generate(&name),
            company_id,
            name,
            description: String::new(),
            status: SolutionStatus::Draft,
            categories: Vec::new(),
            parameters: Vec::new(),
            calculations: Vec::new(),
            product_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn failed_calculations(&self) -> Vec<&Calculation> {
        self.calculations
            .iter()
            .filter(|c| c.status == CalculationStatus::Error)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub description: String,
    /// Partial PUE quoted by the manufacturer; display data only.
    #[serde(default)]
    pub ppue: Option<f64>,
    #[serde(default)]
    pub solution_id: Option<SolutionId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub billing_email: String,
    #[serde(default)]
    pub tax_number: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub billing: BillingDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: impl Into<String>, contact_email: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: CompanyId::generate(&name),
            name,
            contact_email: contact_email.into(),
            phone: None,
            website: None,
            address: None,
            billing: BillingDetails::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    #[default]
    Member,
    Viewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Member => "member",
            UserRole::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(UserRole::Admin),
            "member" => Some(UserRole::Member),
            "viewer" => Some(UserRole::Viewer),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub company_id: CompanyId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub job_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields a user may change on their own profile. `None` leaves a field as is.
#[derive(Clone, Debug, Default)]
pub struct UserProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub job_title: Option<Option<String>>,
    pub role: Option<UserRole>,
}

/// Input for creating a user; the ID and timestamp are assigned on insert.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub company_id: CompanyId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub job_title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parameter_serializes_interface_type() {
        let param = Parameter::new("it_load_kw", 400.0, Category::default())
            .with_interface(InterfaceKind::NotViewable, true);
        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json["user_interface"]["type"], "not_viewable");
        assert_eq!(json["user_interface"]["is_advanced"], true);
        assert_eq!(json["display_type"], "simple");
    }

    #[test]
    fn test_calculation_display_value() {
        let mut calc = Calculation::new("cooling_kw", "it_load_kw * 0.2", Category::default());
        assert_eq!(calc.display_value(), "");

        calc.status = CalculationStatus::Valid;
        calc.result = Some(80.0);
        assert_eq!(calc.display_value(), "80");

        calc.status = CalculationStatus::Error;
        assert_eq!(calc.display_value(), ERROR_SENTINEL);
    }

    #[test]
    fn test_calculation_deserializes_with_defaults() {
        let json = r##"{
            "id": "calc-1",
            "name": "annual_kwh",
            "formula": "cooling_kw * 8760",
            "category": {"name": "Energy", "color": "#22C55E"}
        }"##;
        let calc: Calculation = serde_json::from_str(json).unwrap();
        assert_eq!(calc.status, CalculationStatus::Pending);
        assert!(calc.display_result);
        assert_eq!(calc.id, CalculationId("calc-1".to_string()));
    }

    #[test]
    fn test_solution_status_round_trip() {
        for status in [
            SolutionStatus::Draft,
            SolutionStatus::PendingReview,
            SolutionStatus::Approved,
            SolutionStatus::Rejected,
        ] {
            assert_eq!(SolutionStatus::parse(status.as_str()), Some(status));
        }
        assert!(SolutionStatus::Rejected.is_editable());
        assert!(!SolutionStatus::PendingReview.is_editable());
    }

    #[test]
    fn test_category_same_name_ignores_case() {
        let category = Category::new("Energy", "#22C55E");
        assert!(category.same_name(" energy "));
        assert!(!category.same_name("Water"));
    }
}
