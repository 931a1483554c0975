//! Parameter store: the flat, category-grouped list of named inputs that
//! calculation formulas read.

use std::collections::HashMap;

use tracing::debug;

use crate::error::ParameterError;
use crate::formula::ast::KEYWORDS;
use crate::models::{Category, DisplayType, InterfaceKind, Parameter, ParameterId};

/// Which value of a parameter feeds the evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueMode {
    /// Override if set, otherwise the default.
    #[default]
    Live,
    /// Test value if set, otherwise the live value.
    Test,
}

/// Checks that `name` can be referenced from a formula.
///
/// Names with spaces are fine (formulas quote them as `[IT Load]`), but
/// brackets, keywords and surrounding whitespace are not.
pub fn validate_name(name: &str) -> Result<(), ParameterError> {
    let invalid = |reason: &str| ParameterError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.trim() != name {
        return Err(invalid("leading or trailing whitespace"));
    }
    if name.contains('[') || name.contains(']') {
        return Err(invalid("brackets are not allowed"));
    }
    if KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(name)) {
        return Err(invalid("reserved word"));
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(invalid("must not start with a digit"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    parameters: Vec<Parameter>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from existing parameters, validating each one.
    pub fn from_parameters(parameters: Vec<Parameter>) -> Result<Self, ParameterError> {
        let mut store = Self::new();
        for parameter in parameters {
            store.add(parameter)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn into_vec(self) -> Vec<Parameter> {
        self.parameters
    }

    pub fn as_slice(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Returns true if a parameter already uses `name`, ignoring case.
    pub fn contains_name(&self, name: &str) -> bool {
        self.parameters
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn add(&mut self, parameter: Parameter) -> Result<&Parameter, ParameterError> {
        validate_name(&parameter.name)?;
        if self.contains_name(&parameter.name) {
            return Err(ParameterError::DuplicateName(parameter.name));
        }
        check_finite(&parameter.name, parameter.value)?;
        if let Some(value) = parameter.override_value {
            check_allowed(&parameter, value)?;
        }

        debug!(name = %parameter.name, "adding parameter");
        self.parameters.push(parameter);
        let last = self.parameters.len() - 1;
        Ok(&self.parameters[last])
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn get_by_id(&self, id: &ParameterId) -> Option<&Parameter> {
        self.parameters.iter().find(|p| &p.id == id)
    }

    fn position(&self, name: &str) -> Result<usize, ParameterError> {
        self.parameters
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Parameter, ParameterError> {
        let index = self.position(name)?;
        Ok(&mut self.parameters[index])
    }

    pub fn remove(&mut self, name: &str) -> Result<Parameter, ParameterError> {
        let index = self.position(name)?;
        Ok(self.parameters.remove(index))
    }

    /// Replaces the definition of `name`, keeping its ID.
    pub fn update(&mut self, name: &str, mut replacement: Parameter) -> Result<(), ParameterError> {
        let index = self.position(name)?;
        validate_name(&replacement.name)?;
        let clashes = self
            .parameters
            .iter()
            .enumerate()
            .any(|(i, p)| i != index && p.name.eq_ignore_ascii_case(&replacement.name));
        if clashes {
            return Err(ParameterError::DuplicateName(replacement.name));
        }
        check_finite(&replacement.name, replacement.value)?;
        if let Some(value) = replacement.override_value {
            check_allowed(&replacement, value)?;
        }
        replacement.id = self.parameters[index].id.clone();
        self.parameters[index] = replacement;
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), ParameterError> {
        validate_name(to)?;
        let index = self.position(from)?;
        let clashes = self
            .parameters
            .iter()
            .enumerate()
            .any(|(i, p)| i != index && p.name.eq_ignore_ascii_case(to));
        if clashes {
            return Err(ParameterError::DuplicateName(to.to_string()));
        }
        self.parameters[index].name = to.to_string();
        Ok(())
    }

    /// Overrides the default value of `name`.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), ParameterError> {
        let parameter = self.get_mut(name)?;
        check_allowed(parameter, value)?;
        parameter.override_value = Some(value);
        Ok(())
    }

    /// Drops the override so the default value applies again.
    pub fn clear_override(&mut self, name: &str) -> Result<(), ParameterError> {
        self.get_mut(name)?.override_value = None;
        Ok(())
    }

    pub fn set_test_value(&mut self, name: &str, value: Option<f64>) -> Result<(), ParameterError> {
        let parameter = self.get_mut(name)?;
        if let Some(value) = value {
            check_finite(&parameter.name, value)?;
        }
        parameter.test_value = value;
        Ok(())
    }

    /// Changes the category of every parameter in `from` to `to`.
    pub fn recategorize(&mut self, from: &str, to: &Category) -> usize {
        let mut moved = 0;
        for parameter in self.parameters.iter_mut().filter(|p| p.category.same_name(from)) {
            parameter.category = to.clone();
            moved += 1;
        }
        moved
    }

    pub fn effective_value(&self, name: &str, mode: ValueMode) -> Option<f64> {
        self.get(name).map(|p| effective(p, mode))
    }

    /// Name to value map consumed by the evaluator.
    pub fn values(&self, mode: ValueMode) -> HashMap<String, f64> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), effective(p, mode)))
            .collect()
    }

    /// Parameters grouped by category, in the order categories first appear.
    pub fn by_category(&self) -> Vec<(Category, Vec<&Parameter>)> {
        let mut groups: Vec<(Category, Vec<&Parameter>)> = Vec::new();
        for parameter in &self.parameters {
            match groups
                .iter_mut()
                .find(|(category, _)| category.same_name(&parameter.category.name))
            {
                Some((_, members)) => members.push(parameter),
                None => groups.push((parameter.category.clone(), vec![parameter])),
            }
        }
        groups
    }

    /// Parameters a user of the solution gets to see.
    pub fn visible(&self, include_advanced: bool) -> Vec<&Parameter> {
        self.parameters
            .iter()
            .filter(|p| p.user_interface.kind != InterfaceKind::NotViewable)
            .filter(|p| include_advanced || !p.user_interface.is_advanced)
            .collect()
    }

    /// Parameters a user of the solution may edit.
    pub fn inputs(&self) -> Vec<&Parameter> {
        self.parameters
            .iter()
            .filter(|p| p.user_interface.kind == InterfaceKind::Input)
            .collect()
    }

    /// Filter parameters, used to narrow down the product catalog.
    pub fn filters(&self) -> Vec<&Parameter> {
        self.parameters
            .iter()
            .filter(|p| p.display_type == DisplayType::Filter)
            .collect()
    }
}

fn effective(parameter: &Parameter, mode: ValueMode) -> f64 {
    let live = parameter.override_value.unwrap_or(parameter.value);
    match mode {
        ValueMode::Live => live,
        ValueMode::Test => parameter.test_value.unwrap_or(live),
    }
}

fn check_finite(name: &str, value: f64) -> Result<(), ParameterError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ParameterError::NonFinite(name.to_string()))
    }
}

/// Dropdowns only accept one of their options; ranges only values in bounds.
fn check_allowed(parameter: &Parameter, value: f64) -> Result<(), ParameterError> {
    check_finite(&parameter.name, value)?;
    match parameter.display_type {
        DisplayType::Dropdown if !parameter.options.is_empty() => {
            if parameter
                .options
                .iter()
                .any(|o| (o.value - value).abs() < f64::EPSILON)
            {
                Ok(())
            } else {
                Err(ParameterError::NotAnOption {
                    name: parameter.name.clone(),
                    value,
                })
            }
        }
        DisplayType::Range => match parameter.range {
            Some(range) if !range.contains(value) => Err(ParameterError::OutOfRange {
                name: parameter.name.clone(),
                value,
                min: range.min,
                max: range.max,
            }),
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterOption;
    use pretty_assertions::assert_eq;

    fn energy() -> Category {
        Category::new("Energy", "#22C55E")
    }

    fn site() -> Category {
        Category::new("Site", "#3B82F6")
    }

    fn sample_store() -> ParameterStore {
        let mut store = ParameterStore::new();
        store
            .add(Parameter::new("it_load_kw", 400.0, site()).with_unit("kW"))
            .unwrap();
        store
            .add(Parameter::new("ppue", 1.3, energy()).with_range(1.0, 2.0, Some(0.01)))
            .unwrap();
        store
            .add(
                Parameter::new("tariff", 0.15, energy()).with_options(vec![
                    ParameterOption {
                        label: "Standard".to_string(),
                        value: 0.15,
                    },
                    ParameterOption {
                        label: "Green".to_string(),
                        value: 0.19,
                    },
                ]),
            )
            .unwrap();
        store
            .add(
                Parameter::new("hours", 8760.0, site())
                    .with_interface(InterfaceKind::NotViewable, false),
            )
            .unwrap();
        store
            .add(
                Parameter::new("fan_margin", 0.05, energy())
                    .with_interface(InterfaceKind::Static, true),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_names() {
        let mut store = sample_store();
        assert_eq!(
            store.add(Parameter::new("IT_LOAD_KW", 1.0, site())).unwrap_err(),
            ParameterError::DuplicateName("IT_LOAD_KW".to_string())
        );
        assert!(matches!(
            store.add(Parameter::new("", 1.0, site())),
            Err(ParameterError::InvalidName { .. })
        ));
        assert!(matches!(
            store.add(Parameter::new("and", 1.0, site())),
            Err(ParameterError::InvalidName { .. })
        ));
        assert!(matches!(
            store.add(Parameter::new("[x]", 1.0, site())),
            Err(ParameterError::InvalidName { .. })
        ));
        assert!(store.add(Parameter::new("IT Load", 1.0, site())).is_ok());
    }

    #[test]
    fn test_effective_values_by_mode() {
        let mut store = sample_store();
        store.set_value("it_load_kw", 500.0).unwrap();
        store.set_test_value("it_load_kw", Some(50.0)).unwrap();

        assert_eq!(store.effective_value("it_load_kw", ValueMode::Live), Some(500.0));
        assert_eq!(store.effective_value("it_load_kw", ValueMode::Test), Some(50.0));
        assert_eq!(store.effective_value("ppue", ValueMode::Test), Some(1.3));

        store.clear_override("it_load_kw").unwrap();
        assert_eq!(store.effective_value("it_load_kw", ValueMode::Live), Some(400.0));

        let values = store.values(ValueMode::Live);
        assert_eq!(values.len(), 5);
        assert_eq!(values["hours"], 8760.0);
    }

    #[test]
    fn test_override_respects_dropdown_and_range() {
        let mut store = sample_store();
        assert!(store.set_value("tariff", 0.19).is_ok());
        assert!(matches!(
            store.set_value("tariff", 0.2),
            Err(ParameterError::NotAnOption { .. })
        ));
        assert!(matches!(
            store.set_value("ppue", 2.5),
            Err(ParameterError::OutOfRange { .. })
        ));
        assert!(matches!(
            store.set_value("ppue", f64::NAN),
            Err(ParameterError::NonFinite(_))
        ));
        assert!(matches!(
            store.set_value("missing", 1.0),
            Err(ParameterError::NotFound(_))
        ));
    }

    #[test]
    fn test_by_category_keeps_first_seen_order() {
        let store = sample_store();
        let groups = store.by_category();
        let summary: Vec<(String, Vec<&str>)> = groups
            .iter()
            .map(|(category, members)| {
                (
                    category.name.clone(),
                    members.iter().map(|p| p.name.as_str()).collect(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Site".to_string(), vec!["it_load_kw", "hours"]),
                ("Energy".to_string(), vec!["ppue", "tariff", "fan_margin"]),
            ]
        );
    }

    #[test]
    fn test_visible_and_inputs() {
        let store = sample_store();
        let basic: Vec<&str> = store.visible(false).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(basic, vec!["it_load_kw", "ppue", "tariff"]);

        let all: Vec<&str> = store.visible(true).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(all, vec!["it_load_kw", "ppue", "tariff", "fan_margin"]);

        assert_eq!(store.inputs().len(), 3);
    }

    #[test]
    fn test_rename_and_update_keep_identity() {
        let mut store = sample_store();
        let id = store.get("ppue").unwrap().id.clone();

        store.rename("ppue", "cooling_ppue").unwrap();
        assert!(store.get("ppue").is_none());
        assert_eq!(store.get("cooling_ppue").unwrap().id, id);

        assert_eq!(
            store.rename("cooling_ppue", "Tariff").unwrap_err(),
            ParameterError::DuplicateName("Tariff".to_string())
        );

        store
            .update("cooling_ppue", Parameter::new("cooling_ppue", 1.1, energy()))
            .unwrap();
        let updated = store.get_by_id(&id).unwrap();
        assert_eq!(updated.value, 1.1);
        assert_eq!(updated.display_type, DisplayType::Simple);
    }

    #[test]
    fn test_recategorize() {
        let mut store = sample_store();
        let cooling = Category::new("Cooling", "#0EA5E9");
        assert_eq!(store.recategorize("energy", &cooling), 3);
        assert!(store.iter().all(|p| p.category.name != "Energy"));
    }
}
