//! Multi-step solution builder.
//!
//! The builder owns a solution while it is being edited: details first, then
//! categories, parameters and calculations, and finally a review. Every
//! change that can move a result re-runs the recalculation pass.

use std::fmt;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::FormulaConfig;
use crate::error::{BuilderError, ParameterError};
use crate::formula;
use crate::graph::DependencyGraph;
use crate::models::{Calculation, Category, CompanyId, Parameter, Solution};
use crate::parameters::{validate_name, ParameterStore, ValueMode};
use crate::recalc::{RecalcReport, Recalculator};

pub type Result<T> = std::result::Result<T, BuilderError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuilderStep {
    #[default]
    Details,
    Categories,
    Parameters,
    Calculations,
    Review,
}

impl BuilderStep {
    pub const ALL: [BuilderStep; 5] = [
        BuilderStep::Details,
        BuilderStep::Categories,
        BuilderStep::Parameters,
        BuilderStep::Calculations,
        BuilderStep::Review,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BuilderStep::Details => "details",
            BuilderStep::Categories => "categories",
            BuilderStep::Parameters => "parameters",
            BuilderStep::Calculations => "calculations",
            BuilderStep::Review => "review",
        }
    }

    pub fn next(self) -> Option<Self> {
        let index = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(index + 1).copied()
    }

    pub fn previous(self) -> Option<Self> {
        let index = Self::ALL.iter().position(|s| *s == self)?;
        index.checked_sub(1).map(|i| Self::ALL[i])
    }
}

impl fmt::Display for BuilderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone)]
pub struct SolutionBuilder {
    /// Identity, status, timestamps and linked products. Categories,
    /// parameters and calculations live in the fields below while editing.
    solution: Solution,
    categories: Vec<Category>,
    parameters: ParameterStore,
    calculations: Vec<Calculation>,
    step: BuilderStep,
    furthest: BuilderStep,
    recalculator: Recalculator,
    report: RecalcReport,
}

impl SolutionBuilder {
    /// Starts a new, empty draft for `company_id`.
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            solution: Solution::new(company_id, ""),
            categories: Vec::new(),
            parameters: ParameterStore::new(),
            calculations: Vec::new(),
            step: BuilderStep::Details,
            furthest: BuilderStep::Details,
            recalculator: Recalculator::default(),
            report: RecalcReport::default(),
        }
    }

    /// Opens an existing solution for editing. Every step counts as reached.
    pub fn from_solution(mut solution: Solution) -> Result<Self> {
        let parameters = ParameterStore::from_parameters(std::mem::take(&mut solution.parameters))?;
        let calculations = std::mem::take(&mut solution.calculations);
        let categories = std::mem::take(&mut solution.categories);

        let mut builder = Self {
            solution,
            categories,
            parameters,
            calculations,
            step: BuilderStep::Details,
            furthest: BuilderStep::Review,
            recalculator: Recalculator::default(),
            report: RecalcReport::default(),
        };
        builder.recalculate();
        Ok(builder)
    }

    /// Limits the length of formulas accepted from now on.
    pub fn with_max_formula_len(mut self, max_formula_len: usize) -> Self {
        self.recalculator.max_formula_len = max_formula_len;
        self.recalculate();
        self
    }

    pub fn with_config(self, config: &FormulaConfig) -> Self {
        self.with_max_formula_len(config.max_length)
    }

    pub fn step(&self) -> BuilderStep {
        self.step
    }

    pub fn furthest(&self) -> BuilderStep {
        self.furthest
    }

    pub fn name(&self) -> &str {
        &self.solution.name
    }

    pub fn description(&self) -> &str {
        &self.solution.description
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn calculations(&self) -> &[Calculation] {
        &self.calculations
    }

    pub fn calculation(&self, name: &str) -> Option<&Calculation> {
        self.calculations.iter().find(|c| c.name == name)
    }

    /// Outcome of the latest recalculation pass.
    pub fn report(&self) -> &RecalcReport {
        &self.report
    }

    pub fn test_mode(&self) -> bool {
        self.recalculator.mode == ValueMode::Test
    }

    // --- Steps ---

    /// Validates the current step and moves to the next one.
    pub fn next(&mut self) -> Result<BuilderStep> {
        if let Err(err) = self.validate_step(self.step) {
            warn!(step = %self.step, error = %err, "cannot leave builder step");
            return Err(err);
        }
        if let Some(next) = self.step.next() {
            self.step = next;
            self.furthest = self.furthest.max(next);
            debug!(step = %next, "builder step advanced");
        }
        Ok(self.step)
    }

    /// Moves one step back without validating anything.
    pub fn back(&mut self) -> BuilderStep {
        if let Some(previous) = self.step.previous() {
            self.step = previous;
        }
        self.step
    }

    /// Jumps to a step that has been reached before.
    pub fn go_to(&mut self, step: BuilderStep) -> Result<()> {
        if step > self.furthest {
            return Err(BuilderError::StepNotReached(step.label().to_string()));
        }
        self.step = step;
        Ok(())
    }

    pub fn validate_step(&self, step: BuilderStep) -> Result<()> {
        let incomplete = |reason: String| BuilderError::StepIncomplete {
            step: step.label().to_string(),
            reason,
        };
        match step {
            BuilderStep::Details if self.solution.name.trim().is_empty() => {
                Err(incomplete("solution name is required".to_string()))
            }
            BuilderStep::Categories if self.categories.is_empty() => {
                Err(incomplete("add at least one category".to_string()))
            }
            BuilderStep::Parameters if self.parameters.is_empty() => {
                Err(incomplete("add at least one parameter".to_string()))
            }
            BuilderStep::Calculations if !self.report.is_clean() => {
                let failed: Vec<&str> = self
                    .report
                    .failures
                    .iter()
                    .map(|f| f.name.as_str())
                    .collect();
                Err(incomplete(format!(
                    "calculations with errors: {}",
                    failed.join(", ")
                )))
            }
            _ => Ok(()),
        }
    }

    // --- Details ---

    pub fn set_details(&mut self, name: &str, description: &str) {
        self.solution.name = name.trim().to_string();
        self.solution.description = description.trim().to_string();
    }

    // --- Categories ---

    fn category_position(&self, name: &str) -> Result<usize> {
        self.categories
            .iter()
            .position(|c| c.same_name(name))
            .ok_or_else(|| BuilderError::CategoryNotFound(name.to_string()))
    }

    fn check_color(color: &str) -> Result<()> {
        if is_hex_color(color) {
            Ok(())
        } else {
            Err(BuilderError::InvalidColor(color.to_string()))
        }
    }

    pub fn add_category(&mut self, name: &str, color: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BuilderError::EmptyCategoryName);
        }
        if self.categories.iter().any(|c| c.same_name(name)) {
            return Err(BuilderError::DuplicateCategory(name.to_string()));
        }
        Self::check_color(color)?;
        self.categories.push(Category::new(name, color));
        Ok(())
    }

    pub fn recolor_category(&mut self, name: &str, color: &str) -> Result<()> {
        Self::check_color(color)?;
        let index = self.category_position(name)?;
        self.categories[index].color = color.to_string();
        let updated = self.categories[index].clone();
        self.apply_category(name, &updated);
        Ok(())
    }

    /// Renames a category and moves everything filed under it.
    pub fn rename_category(&mut self, from: &str, to: &str) -> Result<()> {
        let to = to.trim();
        if to.is_empty() {
            return Err(BuilderError::EmptyCategoryName);
        }
        let index = self.category_position(from)?;
        let clashes = self
            .categories
            .iter()
            .enumerate()
            .any(|(i, c)| i != index && c.same_name(to));
        if clashes {
            return Err(BuilderError::DuplicateCategory(to.to_string()));
        }
        self.categories[index].name = to.to_string();
        let updated = self.categories[index].clone();
        self.apply_category(from, &updated);
        Ok(())
    }

    /// Removes a category nothing is filed under anymore.
    pub fn remove_category(&mut self, name: &str) -> Result<()> {
        let index = self.category_position(name)?;
        let used_by: Vec<String> = self
            .parameters
            .iter()
            .filter(|p| p.category.same_name(name))
            .map(|p| p.name.clone())
            .chain(
                self.calculations
                    .iter()
                    .filter(|c| c.category.same_name(name))
                    .map(|c| c.name.clone()),
            )
            .collect();
        if !used_by.is_empty() {
            warn!(category = name, "refusing to remove category in use");
            return Err(BuilderError::InUse {
                name: name.to_string(),
                used_by,
            });
        }
        self.categories.remove(index);
        Ok(())
    }

    fn apply_category(&mut self, old_name: &str, category: &Category) {
        self.parameters.recategorize(old_name, category);
        for calc in self
            .calculations
            .iter_mut()
            .filter(|c| c.category.same_name(old_name))
        {
            calc.category = category.clone();
        }
    }

    /// The builder's own copy of the named category.
    fn resolve_category(&self, category: &Category) -> Result<Category> {
        let index = self.category_position(&category.name)?;
        Ok(self.categories[index].clone())
    }

    // --- Parameters ---

    fn calculation_position(&self, name: &str) -> Result<usize> {
        self.calculations
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| BuilderError::CalculationNotFound(name.to_string()))
    }

    /// Whether a calculation other than `skip` already uses `name`.
    fn calculation_named(&self, name: &str, skip: Option<usize>) -> bool {
        self.calculations
            .iter()
            .enumerate()
            .any(|(i, c)| Some(i) != skip && c.name.eq_ignore_ascii_case(name))
    }

    pub fn add_parameter(&mut self, mut parameter: Parameter) -> Result<()> {
        parameter.category = self.resolve_category(&parameter.category)?;
        if self.calculation_named(&parameter.name, None) {
            return Err(ParameterError::DuplicateName(parameter.name).into());
        }
        self.parameters.add(parameter)?;
        self.recalculate();
        Ok(())
    }

    /// Replaces the definition of `name`. A new name is carried into every
    /// formula that read the old one.
    pub fn update_parameter(&mut self, name: &str, mut replacement: Parameter) -> Result<()> {
        replacement.category = self.resolve_category(&replacement.category)?;
        let new_name = replacement.name.clone();
        let renamed = new_name != name;
        if renamed && self.calculation_named(&new_name, None) {
            return Err(ParameterError::DuplicateName(new_name).into());
        }
        self.parameters.update(name, replacement)?;
        if renamed {
            self.rewrite_formulas(name, &new_name);
        }
        self.recalculate();
        Ok(())
    }

    pub fn rename_parameter(&mut self, from: &str, to: &str) -> Result<()> {
        if self.calculation_named(to, None) {
            return Err(ParameterError::DuplicateName(to.to_string()).into());
        }
        self.parameters.rename(from, to)?;
        self.rewrite_formulas(from, to);
        self.recalculate();
        Ok(())
    }

    /// Removes a parameter no formula reads.
    pub fn remove_parameter(&mut self, name: &str) -> Result<Parameter> {
        if self.parameters.get(name).is_none() {
            return Err(ParameterError::NotFound(name.to_string()).into());
        }
        self.ensure_unreferenced(name)?;
        let removed = self.parameters.remove(name)?;
        self.recalculate();
        Ok(removed)
    }

    pub fn set_parameter_value(&mut self, name: &str, value: f64) -> Result<()> {
        self.parameters.set_value(name, value)?;
        self.recalculate();
        Ok(())
    }

    pub fn clear_parameter_override(&mut self, name: &str) -> Result<()> {
        self.parameters.clear_override(name)?;
        self.recalculate();
        Ok(())
    }

    pub fn set_parameter_test_value(&mut self, name: &str, value: Option<f64>) -> Result<()> {
        self.parameters.set_test_value(name, value)?;
        if self.test_mode() {
            self.recalculate();
        }
        Ok(())
    }

    // --- Calculations ---

    /// Rejects formulas that cannot parse or that read their own result
    /// under any of `names`. An empty formula is fine; the calculation stays
    /// pending.
    fn check_formula(&self, names: &[&str], formula: &str) -> Result<()> {
        if formula.trim().is_empty() {
            return Ok(());
        }
        let expr = formula::parse_bounded(formula, self.recalculator.max_formula_len)?;
        let references = expr.references();
        if names.iter().any(|name| references.contains(*name)) {
            return Err(BuilderError::SelfReference(names[0].to_string()));
        }
        Ok(())
    }

    fn check_calculation_name(&self, name: &str, skip: Option<usize>) -> Result<()> {
        validate_name(name)?;
        if self.parameters.contains_name(name) || self.calculation_named(name, skip) {
            return Err(ParameterError::DuplicateName(name.to_string()).into());
        }
        Ok(())
    }

    pub fn add_calculation(&mut self, mut calculation: Calculation) -> Result<()> {
        self.check_calculation_name(&calculation.name, None)?;
        calculation.category = self.resolve_category(&calculation.category)?;
        self.check_formula(&[calculation.name.as_str()], &calculation.formula)?;
        self.calculations.push(calculation);
        self.recalculate();
        Ok(())
    }

    pub fn update_calculation_formula(&mut self, name: &str, formula: &str) -> Result<()> {
        let index = self.calculation_position(name)?;
        self.check_formula(&[name], formula)?;
        self.calculations[index].formula = formula.to_string();
        self.recalculate();
        Ok(())
    }

    /// Replaces the definition of `name`, keeping its ID. A new name is
    /// carried into every formula that read the old one.
    pub fn update_calculation(&mut self, name: &str, mut replacement: Calculation) -> Result<()> {
        let index = self.calculation_position(name)?;
        let renamed = replacement.name != name;
        if renamed {
            self.check_calculation_name(&replacement.name, Some(index))?;
        }
        replacement.category = self.resolve_category(&replacement.category)?;
        // The old name is rewritten to the new one below.
        self.check_formula(&[replacement.name.as_str(), name], &replacement.formula)?;

        replacement.id = self.calculations[index].id.clone();
        let new_name = replacement.name.clone();
        self.calculations[index] = replacement;
        if renamed {
            self.rewrite_formulas(name, &new_name);
        }
        self.recalculate();
        Ok(())
    }

    pub fn rename_calculation(&mut self, from: &str, to: &str) -> Result<()> {
        let index = self.calculation_position(from)?;
        self.check_calculation_name(to, Some(index))?;
        self.calculations[index].name = to.to_string();
        self.rewrite_formulas(from, to);
        self.recalculate();
        Ok(())
    }

    /// Removes a calculation no other formula reads.
    pub fn remove_calculation(&mut self, name: &str) -> Result<Calculation> {
        let index = self.calculation_position(name)?;
        self.ensure_unreferenced(name)?;
        let removed = self.calculations.remove(index);
        self.recalculate();
        Ok(removed)
    }

    fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::build(
            self.parameters.names(),
            self.calculations.iter().map(|c| {
                let refs = formula::references(&c.formula).unwrap_or_default();
                (c.name.as_str(), refs)
            }),
        )
    }

    fn ensure_unreferenced(&self, name: &str) -> Result<()> {
        let graph = self.dependency_graph();
        let used_by: Vec<String> = graph
            .dependents_of(name)
            .into_iter()
            .map(str::to_string)
            .collect();
        if used_by.is_empty() {
            return Ok(());
        }
        warn!(item = name, used_by = used_by.len(), "refusing to remove referenced name");
        Err(BuilderError::InUse {
            name: name.to_string(),
            used_by,
        })
    }

    /// Points every formula that reads `from` at `to`. Formulas that do not
    /// parse are left as they are.
    fn rewrite_formulas(&mut self, from: &str, to: &str) {
        for calc in &mut self.calculations {
            match formula::rename_in_formula(&calc.formula, from, to) {
                Ok(rewritten) => calc.formula = rewritten,
                Err(err) => debug!(calculation = %calc.name, error = %err, "formula not rewritten"),
            }
        }
    }

    // --- Evaluation ---

    /// Switches between live values and test values and re-evaluates.
    pub fn set_test_mode(&mut self, enabled: bool) {
        self.recalculator.mode = if enabled {
            ValueMode::Test
        } else {
            ValueMode::Live
        };
        self.recalculate();
    }

    pub fn recalculate(&mut self) -> &RecalcReport {
        self.report = self
            .recalculator
            .run(&self.parameters, &mut self.calculations);
        &self.report
    }

    /// The solution as currently edited, for saving a draft. Results are
    /// computed from live values even while test mode is on.
    pub fn snapshot(&self) -> Solution {
        let mut solution = self.solution.clone();
        solution.categories = self.categories.clone();
        solution.parameters = self.parameters.as_slice().to_vec();
        solution.calculations = self.calculations.clone();
        if self.test_mode() {
            let live = Recalculator {
                mode: ValueMode::Live,
                ..self.recalculator
            };
            live.run(&self.parameters, &mut solution.calculations);
        }
        solution.updated_at = Utc::now();
        solution
    }

    /// Hands back the finished solution once the review step is reached and
    /// every step validates.
    pub fn finish(mut self) -> Result<Solution> {
        if self.furthest < BuilderStep::Review {
            return Err(BuilderError::StepNotReached(
                BuilderStep::Review.label().to_string(),
            ));
        }
        // Results must reflect live values, not a test drive.
        if self.test_mode() {
            self.set_test_mode(false);
        }
        for step in BuilderStep::ALL {
            self.validate_step(step)?;
        }
        let mut solution = self.solution;
        solution.categories = self.categories;
        solution.parameters = self.parameters.into_vec();
        solution.calculations = self.calculations;
        solution.updated_at = Utc::now();
        Ok(solution)
    }
}
