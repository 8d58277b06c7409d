use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::forecast::{self, Drivers, PriorYear};
use super::types::{AssumptionSet, LineItem, Row, Year};
use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LadderSnapshot {
    pub years: Vec<Year>,
    pub forecast_start: usize,
    pub rows: BTreeMap<LineItem, Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementLadder {
    years: Vec<Year>,
    forecast_start: usize,
    rows: BTreeMap<LineItem, Row>,
    baseline: BTreeMap<LineItem, Row>,
}

impl StatementLadder {
    pub fn new(
        years: Vec<Year>,
        forecast_start: usize,
        rows: BTreeMap<LineItem, Row>,
    ) -> ModelResult<Self> {
        validate_shape(&years, forecast_start, &rows)?;
        let baseline = LineItem::DRIVERS
            .iter()
            .filter_map(|item| rows.get(item).map(|row| (*item, row.clone())))
            .collect();
        let mut ladder = Self {
            years,
            forecast_start,
            rows,
            baseline,
        };
        ladder.recompute_all();
        Ok(ladder)
    }

    pub fn years(&self) -> &[Year] {
        &self.years
    }

    pub fn forecast_start(&self) -> usize {
        self.forecast_start
    }

    pub fn historical_years(&self) -> &[Year] {
        &self.years[..self.forecast_start]
    }

    pub fn forecast_years(&self) -> &[Year] {
        &self.years[self.forecast_start..]
    }

    pub fn index_of(&self, year: Year) -> Option<usize> {
        self.years.binary_search(&year).ok()
    }

    pub fn row(&self, item: LineItem) -> &[f64] {
        self.rows
            .get(&item)
            .map(|row| row.0.as_slice())
            .unwrap_or(&[])
    }

    pub fn value(&self, item: LineItem, year: Year) -> Option<f64> {
        self.index_of(year)
            .and_then(|idx| self.row(item).get(idx).copied())
    }

    pub fn forecast_fcf(&self) -> &[f64] {
        &self.row(LineItem::FreeCashFlow)[self.forecast_start..]
    }

    /// Writes one driver cell and recomputes that year and every later
    /// forecast year. A non-finite value is stored as 0.
    pub fn set_driver(&mut self, item: LineItem, year: Year, value: f64) -> ModelResult<()> {
        let idx = self.editable_index(item, year)?;
        let value = if value.is_finite() {
            value
        } else {
            debug!(%item, %year, "non-finite driver value coerced to 0");
            0.0
        };
        self.set_cell(item, idx, value);
        self.recompute_from(idx);
        Ok(())
    }

    pub fn set_driver_input(&mut self, item: LineItem, year: Year, raw: &str) -> ModelResult<()> {
        let value = coerce_typed(raw);
        self.set_driver(item, year, value)
    }

    pub fn reset_forecast(&mut self) {
        for (item, row) in &self.baseline {
            self.rows.insert(*item, row.clone());
        }
        self.recompute_all();
    }

    pub fn load_snapshot(&mut self, snapshot: &LadderSnapshot) -> ModelResult<()> {
        if snapshot.years != self.years {
            return Err(ModelError::validation(
                "snapshot years do not match the current statement",
            ));
        }
        validate_shape(&snapshot.years, snapshot.forecast_start, &snapshot.rows)?;
        if snapshot.forecast_start != self.forecast_start {
            return Err(ModelError::validation(
                "snapshot forecast window does not match the current statement",
            ));
        }
        self.rows = snapshot.rows.clone();
        self.recompute_all();
        Ok(())
    }

    pub fn apply_assumption_set(&mut self, assumptions: &AssumptionSet) -> ModelResult<()> {
        let forecast_years = self.forecast_years().to_vec();
        for item in LineItem::DRIVERS {
            let Some(values) = assumptions.driver(item) else {
                continue;
            };
            if let Some(year) = values.keys().find(|y| !forecast_years.contains(y)) {
                return Err(ModelError::validation(format!(
                    "assumption set names {year} for {item}, which is not a forecast year"
                )));
            }
            for year in &forecast_years {
                match values.get(year) {
                    Some(v) if v.is_finite() => {}
                    Some(_) => {
                        return Err(ModelError::validation(format!(
                            "assumption set has a non-numeric {item} for {year}"
                        )));
                    }
                    None => {
                        return Err(ModelError::validation(format!(
                            "assumption set is missing {item} for {year}"
                        )));
                    }
                }
            }
        }

        for (offset, year) in forecast_years.iter().enumerate() {
            let idx = self.forecast_start + offset;
            for item in LineItem::DRIVERS {
                if let Some(v) = assumptions.driver(item).and_then(|m| m.get(year)) {
                    self.set_cell(item, idx, *v);
                }
            }
        }
        self.recompute_all();
        Ok(())
    }

    pub fn with_uniform_drivers(&self, revenue_growth: f64, earnings_margin: f64) -> Self {
        let mut ladder = self.clone();
        for idx in ladder.forecast_start..ladder.years.len() {
            ladder.set_cell(LineItem::RevenueGrowth, idx, revenue_growth);
            ladder.set_cell(LineItem::EarningsMargin, idx, earnings_margin);
        }
        ladder.recompute_all();
        ladder
    }

    pub fn snapshot(&self) -> LadderSnapshot {
        LadderSnapshot {
            years: self.years.clone(),
            forecast_start: self.forecast_start,
            rows: self.rows.clone(),
        }
    }

    pub fn recompute_all(&mut self) {
        self.recompute_from(self.forecast_start);
    }

    pub fn recompute_from(&mut self, idx: usize) {
        let start = idx.max(self.forecast_start);
        for i in start..self.years.len() {
            let prior = PriorYear {
                revenue: self.cell(LineItem::TotalRevenue, i - 1),
                invested_capital: self.cell(LineItem::InvestedCapital, i - 1),
                free_cash_flow: self.cell(LineItem::FreeCashFlow, i - 1),
            };
            let drivers = Drivers {
                revenue_growth: self.cell(LineItem::RevenueGrowth, i),
                earnings_margin: self.cell(LineItem::EarningsMargin, i),
                ic_growth: self.cell(LineItem::IcGrowth, i),
            };
            let year = forecast::forecast_year(prior, drivers);
            self.set_cell(LineItem::TotalRevenue, i, year.total_revenue);
            self.set_cell(LineItem::EconomicEarnings, i, year.economic_earnings);
            self.set_cell(LineItem::InvestedCapital, i, year.invested_capital);
            self.set_cell(LineItem::IcChange, i, year.ic_change);
            self.set_cell(LineItem::Aroic, i, year.aroic);
            self.set_cell(LineItem::FreeCashFlow, i, year.free_cash_flow);
            self.set_cell(LineItem::FcfGrowth, i, year.fcf_growth);
        }
        debug!(from = %self.years[start.min(self.years.len() - 1)], "recomputed forecast");
    }

    fn editable_index(&self, item: LineItem, year: Year) -> ModelResult<usize> {
        if !item.is_driver() {
            return Err(ModelError::validation(format!(
                "{item} is derived and cannot be edited"
            )));
        }
        let Some(idx) = self.index_of(year) else {
            return Err(ModelError::validation(format!(
                "{year} is not part of the statement"
            )));
        };
        if idx < self.forecast_start {
            return Err(ModelError::validation(format!(
                "{year} is a historical year and cannot be edited"
            )));
        }
        Ok(idx)
    }

    fn cell(&self, item: LineItem, idx: usize) -> f64 {
        self.row(item).get(idx).copied().unwrap_or(0.0)
    }

    fn set_cell(&mut self, item: LineItem, idx: usize, value: f64) {
        if let Some(cell) = self.rows.get_mut(&item).and_then(|row| row.0.get_mut(idx)) {
            *cell = value;
        }
    }
}

pub(crate) fn validate_shape(
    years: &[Year],
    forecast_start: usize,
    rows: &BTreeMap<LineItem, Row>,
) -> ModelResult<()> {
    if years.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ModelError::validation("years must be strictly increasing"));
    }
    if forecast_start == 0 {
        return Err(ModelError::validation(
            "statement needs at least one historical year",
        ));
    }
    if forecast_start >= years.len() {
        return Err(ModelError::validation(
            "statement needs at least one forecast year",
        ));
    }
    for item in LineItem::ALL {
        match rows.get(&item) {
            None => {
                return Err(ModelError::validation(format!("missing row {item}")));
            }
            Some(row) if row.0.len() != years.len() => {
                return Err(ModelError::validation(format!(
                    "row {item} has {} cells, expected {}",
                    row.0.len(),
                    years.len()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub fn coerce_typed(raw: &str) -> f64 {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            debug!(raw, "unparseable cell input coerced to 0");
            0.0
        }
    }
}
