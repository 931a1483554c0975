//! Recalculation of every calculation of a solution.
//!
//! A pass never aborts: each failure is recorded on the calculation it
//! belongs to and the rest of the pass carries on.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::formula::{self, Expr};
use crate::graph::DependencyGraph;
use crate::models::{Calculation, CalculationStatus};
use crate::parameters::{ParameterStore, ValueMode};

/// Longest formula accepted when no configuration says otherwise.
pub const DEFAULT_MAX_FORMULA_LEN: usize = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub struct CalculationFailure {
    pub name: String,
    pub message: String,
}

/// Summary of one recalculation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecalcReport {
    /// Calculations that produced a number.
    pub evaluated: usize,
    /// Calculations without a formula, or waiting on one that has none.
    pub pending: usize,
    pub failures: Vec<CalculationFailure>,
    /// Names in the order they were evaluated.
    pub order: Vec<String>,
    pub had_cycles: bool,
}

impl RecalcReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Valid(f64),
    Failed(String),
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recalculator {
    pub mode: ValueMode,
    pub max_formula_len: usize,
}

impl Default for Recalculator {
    fn default() -> Self {
        Self {
            mode: ValueMode::Live,
            max_formula_len: DEFAULT_MAX_FORMULA_LEN,
        }
    }
}

impl Recalculator {
    pub fn new(mode: ValueMode, max_formula_len: usize) -> Self {
        Self {
            mode,
            max_formula_len,
        }
    }

    /// Re-evaluates all calculations in dependency order and writes result,
    /// status, error and level back onto each of them.
    pub fn run(&self, parameters: &ParameterStore, calculations: &mut [Calculation]) -> RecalcReport {
        let count = calculations.len();
        let mut outcomes: Vec<Option<Outcome>> = vec![None; count];
        let mut parsed: Vec<Option<Expr>> = vec![None; count];

        for (i, calc) in calculations.iter().enumerate() {
            if calc.formula.trim().is_empty() {
                outcomes[i] = Some(Outcome::Pending);
                continue;
            }
            match formula::parse_bounded(&calc.formula, self.max_formula_len) {
                Ok(expr) => parsed[i] = Some(expr),
                Err(err) => outcomes[i] = Some(Outcome::Failed(err.to_string())),
            }
        }

        for i in 0..count {
            let name = &calculations[i].name;
            let clashes_with_parameter = parameters.contains_name(name);
            let clashes_with_calculation = calculations[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(name));
            if clashes_with_parameter || clashes_with_calculation {
                outcomes[i] = Some(Outcome::Failed(format!("name already in use: {name}")));
            }
        }

        let graph = DependencyGraph::build(
            parameters.names(),
            calculations.iter().zip(&parsed).map(|(calc, expr)| {
                let refs = expr.as_ref().map(Expr::references).unwrap_or_default();
                (calc.name.as_str(), refs)
            }),
        );

        for node in 0..count {
            if outcomes[node].is_some() {
                continue;
            }
            if graph.references_itself(node) {
                outcomes[node] = Some(Outcome::Failed(format!(
                    "formula of {} references itself",
                    graph.name(node)
                )));
            } else if let Some(unknown) = graph.unknown_references(node).first() {
                outcomes[node] = Some(Outcome::Failed(format!("unknown variable: {unknown}")));
            }
        }

        let topo = graph.topological_order();
        let mut report = RecalcReport::default();

        let blocked: BTreeSet<usize> = topo.blocked.iter().copied().collect();
        for &node in &topo.blocked {
            if let Some(cycle) = graph.cycle_through(node) {
                report.had_cycles = true;
                if outcomes[node].is_none() {
                    outcomes[node] = Some(Outcome::Failed(cycle.to_string()));
                }
            }
        }
        for &node in &topo.blocked {
            if outcomes[node].is_none() {
                let culprit = graph
                    .precedents(node)
                    .find(|p| blocked.contains(p))
                    .map(|p| graph.name(p).to_string())
                    .unwrap_or_default();
                outcomes[node] = Some(Outcome::Failed(format!(
                    "depends on failed calculation {culprit}"
                )));
            }
        }

        let mut values: HashMap<String, f64> = parameters.values(self.mode);
        for &node in &topo.order {
            report.order.push(graph.name(node).to_string());
            if outcomes[node].is_some() {
                continue;
            }

            let mut waiting = None;
            for precedent in graph.precedents(node) {
                match &outcomes[precedent] {
                    Some(Outcome::Failed(_)) => {
                        waiting = Some(Outcome::Failed(format!(
                            "depends on failed calculation {}",
                            graph.name(precedent)
                        )));
                        break;
                    }
                    Some(Outcome::Pending) => waiting = Some(Outcome::Pending),
                    _ => {}
                }
            }
            if waiting.is_some() {
                outcomes[node] = waiting;
                continue;
            }

            let outcome = match parsed[node].as_ref() {
                Some(expr) => match formula::evaluate_number(expr, &values) {
                    Ok(result) => {
                        values.insert(graph.name(node).to_string(), result);
                        Outcome::Valid(result)
                    }
                    Err(err) => Outcome::Failed(err.to_string()),
                },
                None => Outcome::Pending,
            };
            outcomes[node] = Some(outcome);
        }

        let levels = graph.levels();
        for (node, calc) in calculations.iter_mut().enumerate() {
            calc.level = levels[node];
            match outcomes[node].take().unwrap_or(Outcome::Pending) {
                Outcome::Valid(result) => {
                    calc.result = Some(result);
                    calc.error = None;
                    calc.status = CalculationStatus::Valid;
                    report.evaluated += 1;
                }
                Outcome::Failed(message) => {
                    calc.result = None;
                    calc.status = CalculationStatus::Error;
                    report.failures.push(CalculationFailure {
                        name: calc.name.clone(),
                        message: message.clone(),
                    });
                    calc.error = Some(message);
                }
                Outcome::Pending => {
                    calc.result = None;
                    calc.error = None;
                    calc.status = CalculationStatus::Pending;
                    report.pending += 1;
                }
            }
        }

        if report.had_cycles {
            warn!(failures = report.failures.len(), "circular references in calculations");
        }
        debug!(
            evaluated = report.evaluated,
            pending = report.pending,
            failed = report.failures.len(),
            "recalculation pass finished"
        );
        report
    }
}

/// Recalculates with the default formula length limit.
pub fn recalculate(
    parameters: &ParameterStore,
    calculations: &mut [Calculation],
    mode: ValueMode,
) -> RecalcReport {
    Recalculator {
        mode,
        ..Recalculator::default()
    }
    .run(parameters, calculations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Parameter};
    use pretty_assertions::assert_eq;

    fn store() -> ParameterStore {
        let category = Category::default();
        ParameterStore::from_parameters(vec![
            Parameter::new("it_load_kw", 400.0, category.clone()),
            Parameter::new("ppue", 1.25, category.clone()),
            Parameter::new("hours", 8760.0, category.clone()),
            Parameter::new("price", 0.2, category),
        ])
        .unwrap()
    }

    fn calc(name: &str, formula: &str) -> Calculation {
        Calculation::new(name, formula, Category::default())
    }

    fn by_name<'a>(calcs: &'a [Calculation], name: &str) -> &'a Calculation {
        calcs.iter().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn test_evaluates_in_dependency_order() {
        // Declared with dependents first; a single pass must still be correct.
        let mut calcs = vec![
            calc("annual_cost", "annual_kwh * price"),
            calc("annual_kwh", "cooling_kw * hours"),
            calc("cooling_kw", "it_load_kw * (ppue - 1)"),
        ];
        let report = recalculate(&store(), &mut calcs, ValueMode::Live);

        assert!(report.is_clean());
        assert_eq!(report.evaluated, 3);
        assert_eq!(report.order, vec!["cooling_kw", "annual_kwh", "annual_cost"]);

        let cost = by_name(&calcs, "annual_cost");
        assert_eq!(cost.status, CalculationStatus::Valid);
        assert!((cost.result.unwrap() - 175_200.0).abs() < 1e-6);
        assert_eq!(cost.level, 3);
        assert_eq!(by_name(&calcs, "cooling_kw").level, 1);
    }

    #[test]
    fn test_self_reference_is_token_aware() {
        let mut calcs = vec![
            calc("x", "x + 1"),
            calc("max_ratio", "max(ppue, 1) * 2"),
            calc("p", "ppue * 2"),
        ];
        let report = recalculate(&store(), &mut calcs, ValueMode::Live);

        assert_eq!(by_name(&calcs, "x").status, CalculationStatus::Error);
        assert_eq!(
            by_name(&calcs, "x").error.as_deref(),
            Some("formula of x references itself")
        );
        // "p" appears inside "ppue"; that is not a self reference.
        assert_eq!(by_name(&calcs, "p").status, CalculationStatus::Valid);
        assert_eq!(by_name(&calcs, "max_ratio").status, CalculationStatus::Valid);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_cycles_fail_with_path_and_downstream_fails_too() {
        let mut calcs = vec![
            calc("a", "b + 1"),
            calc("b", "a * 2"),
            calc("c", "a + it_load_kw"),
            calc("d", "hours / 24"),
        ];
        let report = recalculate(&store(), &mut calcs, ValueMode::Live);

        assert!(report.had_cycles);
        assert_eq!(
            by_name(&calcs, "a").error.as_deref(),
            Some("circular reference: a -> b -> a")
        );
        assert_eq!(by_name(&calcs, "b").status, CalculationStatus::Error);
        assert_eq!(
            by_name(&calcs, "c").error.as_deref(),
            Some("depends on failed calculation a")
        );
        assert_eq!(by_name(&calcs, "d").result, Some(365.0));
        assert_eq!(by_name(&calcs, "d").display_value(), "365");
        assert_eq!(by_name(&calcs, "a").display_value(), "Error");
    }

    #[test]
    fn test_errors_propagate_to_dependents() {
        let mut calcs = vec![
            calc("broken", "it_load_kw / (ppue - ppue)"),
            calc("uses_broken", "broken * 2"),
            calc("typo", "it_lod_kw * 2"),
            calc("bad_syntax", "1 +"),
        ];
        recalculate(&store(), &mut calcs, ValueMode::Live);

        assert_eq!(
            by_name(&calcs, "broken").error.as_deref(),
            Some("division by zero")
        );
        assert_eq!(
            by_name(&calcs, "uses_broken").error.as_deref(),
            Some("depends on failed calculation broken")
        );
        assert_eq!(
            by_name(&calcs, "typo").error.as_deref(),
            Some("unknown variable: it_lod_kw")
        );
        assert_eq!(by_name(&calcs, "bad_syntax").status, CalculationStatus::Error);
    }

    #[test]
    fn test_empty_formula_is_pending_and_blocks_dependents() {
        let mut calcs = vec![calc("later", "  "), calc("uses_later", "later + 1")];
        let report = recalculate(&store(), &mut calcs, ValueMode::Live);

        assert_eq!(report.pending, 2);
        assert!(report.is_clean());
        assert!(calcs.iter().all(|c| c.status == CalculationStatus::Pending));
        assert!(calcs.iter().all(|c| c.result.is_none()));
    }

    #[test]
    fn test_name_clash_with_parameter() {
        let mut calcs = vec![calc("ppue", "1.5"), calc("double", "ppue * 2")];
        recalculate(&store(), &mut calcs, ValueMode::Live);

        assert_eq!(by_name(&calcs, "ppue").status, CalculationStatus::Error);
        // The parameter keeps its meaning for other formulas.
        assert_eq!(by_name(&calcs, "double").result, Some(2.5));
    }

    #[test]
    fn test_test_mode_uses_test_values() {
        let mut params = store();
        params.set_test_value("it_load_kw", Some(100.0)).unwrap();
        let mut calcs = vec![calc("cooling_kw", "it_load_kw * (ppue - 1)")];

        recalculate(&params, &mut calcs, ValueMode::Test);
        assert_eq!(calcs[0].result, Some(25.0));

        recalculate(&params, &mut calcs, ValueMode::Live);
        assert_eq!(calcs[0].result, Some(100.0));
    }

    #[test]
    fn test_formula_length_limit() {
        let mut calcs = vec![calc("long", "it_load_kw + it_load_kw")];
        let report = Recalculator::new(ValueMode::Live, 10).run(&store(), &mut calcs);
        assert_eq!(report.failures[0].message, "formula exceeds 10 characters");
    }

    #[test]
    fn test_recovers_after_fix() {
        let mut calcs = vec![calc("ratio", "it_load_kw / 0")];
        recalculate(&store(), &mut calcs, ValueMode::Live);
        assert_eq!(calcs[0].status, CalculationStatus::Error);

        calcs[0].formula = "it_load_kw / 4".to_string();
        recalculate(&store(), &mut calcs, ValueMode::Live);
        assert_eq!(calcs[0].status, CalculationStatus::Valid);
        assert_eq!(calcs[0].error, None);
        assert_eq!(calcs[0].result, Some(100.0));
    }
}
