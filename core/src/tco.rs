//! Total cost of ownership comparison between two cooling scenarios.
//!
//! Pure functions over plain input records, no storage involved. The output
//! carries the series a host needs to draw cumulative cost charts.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TcoError;

/// Longest horizon the calculator accepts, in years.
pub const MAX_YEARS: u32 = 50;

/// One cooling option: what it costs up front and to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct TcoScenario {
    pub name: String,
    /// Up-front investment
    pub capex: f64,
    /// Partial PUE of the cooling system, at least 1.0
    pub ppue: f64,
    pub maintenance_per_year: f64,
    pub water_per_year: f64,
    pub other_opex_per_year: f64,
}

impl TcoScenario {
    pub fn new(name: impl Into<String>, capex: f64, ppue: f64) -> Self {
        Self {
            name: name.into(),
            capex,
            ppue,
            maintenance_per_year: 0.0,
            water_per_year: 0.0,
            other_opex_per_year: 0.0,
        }
    }

    /// Cooling overhead on top of the IT load, in kW.
    pub fn cooling_kw(&self, it_load_kw: f64) -> f64 {
        it_load_kw * (self.ppue - 1.0)
    }

    fn fixed_opex(&self) -> f64 {
        self.maintenance_per_year + self.water_per_year + self.other_opex_per_year
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(default)]
pub struct TcoInput {
    pub years: u32,
    pub it_load_kw: f64,
    pub energy_price_per_kwh: f64,
    /// Yearly energy price increase as a fraction (0.03 = 3%)
    pub energy_price_escalation: f64,
    pub hours_per_year: f64,
    /// Grid emission factor in kg CO₂ per kWh
    pub co2_kg_per_kwh: f64,
    pub baseline: TcoScenario,
    pub alternative: TcoScenario,
}

impl Default for TcoInput {
    fn default() -> Self {
        Self {
            years: 10,
            it_load_kw: 1_000.0,
            energy_price_per_kwh: 0.20,
            energy_price_escalation: 0.03,
            hours_per_year: 8_760.0,
            co2_kg_per_kwh: 0.4,
            baseline: TcoScenario {
                maintenance_per_year: 25_000.0,
                ..TcoScenario::new("Air cooling", 0.0, 1.4)
            },
            alternative: TcoScenario {
                maintenance_per_year: 15_000.0,
                ..TcoScenario::new("Liquid cooling", 750_000.0, 1.1)
            },
        }
    }
}

impl TcoInput {
    pub fn validate(&self) -> Result<(), TcoError> {
        if self.years == 0 || self.years > MAX_YEARS {
            return Err(TcoError::InvalidHorizon {
                max: MAX_YEARS,
                got: self.years,
            });
        }
        let amounts = [
            ("it_load_kw", self.it_load_kw),
            ("energy_price_per_kwh", self.energy_price_per_kwh),
            ("energy_price_escalation", self.energy_price_escalation),
            ("hours_per_year", self.hours_per_year),
            ("co2_kg_per_kwh", self.co2_kg_per_kwh),
        ];
        for (field, value) in amounts {
            check_amount(field, value)?;
        }
        for scenario in [&self.baseline, &self.alternative] {
            if !scenario.ppue.is_finite() || scenario.ppue < 1.0 {
                return Err(TcoError::InvalidPpue {
                    scenario: scenario.name.clone(),
                    value: scenario.ppue,
                });
            }
            let costs = [
                ("capex", scenario.capex),
                ("maintenance_per_year", scenario.maintenance_per_year),
                ("water_per_year", scenario.water_per_year),
                ("other_opex_per_year", scenario.other_opex_per_year),
            ];
            for (field, value) in costs {
                check_amount(&format!("{}.{field}", scenario.name), value)?;
            }
        }
        Ok(())
    }
}

fn check_amount(field: &str, value: f64) -> Result<(), TcoError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TcoError::InvalidAmount {
            field: field.to_string(),
            value,
        })
    }
}

/// Costs of one scenario in one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct TcoYear {
    /// 1-based
    pub year: u32,
    pub energy_kwh: f64,
    pub energy_cost: f64,
    pub maintenance: f64,
    pub water: f64,
    pub other_opex: f64,
    /// Operating cost of this year
    pub total: f64,
    /// Capex plus all operating costs up to and including this year
    pub cumulative: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct TcoBreakdown {
    pub name: String,
    pub capex: f64,
    pub cooling_kw: f64,
    pub annual_energy_kwh: f64,
    pub total_energy_kwh: f64,
    pub total_energy_cost: f64,
    /// All operating costs over the horizon
    pub total_opex: f64,
    /// Capex plus opex
    pub total_cost: f64,
    pub co2_tonnes: f64,
    pub years: Vec<TcoYear>,
    /// Cumulative cost per year, starting with year 0 (capex only)
    pub cumulative: Vec<f64>,
}

/// Both scenarios at one point of the horizon, for charting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct TcoChartPoint {
    pub year: u32,
    pub baseline: f64,
    pub alternative: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct TcoComparison {
    pub baseline: TcoBreakdown,
    pub alternative: TcoBreakdown,
    /// Baseline total minus alternative total; negative when the
    /// alternative costs more
    pub savings_total: f64,
    pub savings_percent: f64,
    pub annual_energy_saved_kwh: f64,
    pub co2_saved_tonnes: f64,
    /// Years until the alternative's cumulative cost drops to the
    /// baseline's, interpolated within the year. `None` if it never does.
    pub payback_years: Option<f64>,
    pub chart: Vec<TcoChartPoint>,
}

/// Cost breakdown of one scenario under the shared assumptions of `input`.
pub fn scenario_breakdown(input: &TcoInput, scenario: &TcoScenario) -> TcoBreakdown {
    let cooling_kw = scenario.cooling_kw(input.it_load_kw);
    let annual_energy_kwh = cooling_kw * input.hours_per_year;

    let mut years = Vec::with_capacity(input.years as usize);
    let mut cumulative = Vec::with_capacity(input.years as usize + 1);
    cumulative.push(scenario.capex);

    let mut running = scenario.capex;
    let mut total_energy_cost = 0.0;
    for year in 1..=input.years {
        let price = input.energy_price_per_kwh
            * (1.0 + input.energy_price_escalation).powi(year as i32 - 1);
        let energy_cost = annual_energy_kwh * price;
        let total = energy_cost + scenario.fixed_opex();
        running += total;
        total_energy_cost += energy_cost;

        years.push(TcoYear {
            year,
            energy_kwh: annual_energy_kwh,
            energy_cost,
            maintenance: scenario.maintenance_per_year,
            water: scenario.water_per_year,
            other_opex: scenario.other_opex_per_year,
            total,
            cumulative: running,
        });
        cumulative.push(running);
    }

    let total_energy_kwh = annual_energy_kwh * input.years as f64;
    TcoBreakdown {
        name: scenario.name.clone(),
        capex: scenario.capex,
        cooling_kw,
        annual_energy_kwh,
        total_energy_kwh,
        total_energy_cost,
        total_opex: running - scenario.capex,
        total_cost: running,
        co2_tonnes: total_energy_kwh * input.co2_kg_per_kwh / 1_000.0,
        years,
        cumulative,
    }
}

/// Point where the alternative's cumulative curve meets the baseline's.
fn payback_years(baseline: &[f64], alternative: &[f64]) -> Option<f64> {
    let gap: Vec<f64> = baseline
        .iter()
        .zip(alternative)
        .map(|(b, a)| b - a)
        .collect();
    if gap.first().is_some_and(|g| *g >= 0.0) {
        return Some(0.0);
    }
    gap.windows(2).enumerate().find_map(|(i, pair)| {
        let (before, after) = (pair[0], pair[1]);
        if after >= 0.0 {
            Some(i as f64 + (-before) / (after - before))
        } else {
            None
        }
    })
}

/// Compares the alternative scenario of `input` against its baseline.
pub fn compute_tco(input: &TcoInput) -> Result<TcoComparison, TcoError> {
    input.validate()?;

    let baseline = scenario_breakdown(input, &input.baseline);
    let alternative = scenario_breakdown(input, &input.alternative);

    let savings_total = baseline.total_cost - alternative.total_cost;
    let savings_percent = if baseline.total_cost > 0.0 {
        savings_total / baseline.total_cost * 100.0
    } else {
        0.0
    };
    let payback = payback_years(&baseline.cumulative, &alternative.cumulative);
    let chart = baseline
        .cumulative
        .iter()
        .zip(&alternative.cumulative)
        .enumerate()
        .map(|(year, (b, a))| TcoChartPoint {
            year: year as u32,
            baseline: *b,
            alternative: *a,
        })
        .collect();

    debug!(
        years = input.years,
        savings_total,
        payback = ?payback,
        "tco comparison computed"
    );

    Ok(TcoComparison {
        annual_energy_saved_kwh: baseline.annual_energy_kwh - alternative.annual_energy_kwh,
        co2_saved_tonnes: baseline.co2_tonnes - alternative.co2_tonnes,
        savings_total,
        savings_percent,
        payback_years: payback,
        chart,
        baseline,
        alternative,
    })
}
