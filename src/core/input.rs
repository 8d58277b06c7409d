use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::ladder::StatementLadder;
use super::types::{LineItem, Row, ValuationParameters, Year};
use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInput {
    pub headers: Vec<Year>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    pub valuation_parameters: ValuationParameters,
    #[serde(default)]
    pub first_forecast_year: Option<Year>,
}

impl ModelInput {
    pub fn from_json(json: &str) -> ModelResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ModelError::validation(format!("invalid model input: {e}")))
    }

    pub fn build(
        &self,
        default_forecast_years: usize,
    ) -> ModelResult<(StatementLadder, ValuationParameters)> {
        let forecast_start = self.forecast_start(default_forecast_years)?;
        self.valuation_parameters.validate()?;

        for key in self.data.keys() {
            if LineItem::from_key(key).is_none() {
                debug!(row = %key, "ignoring unknown statement row");
            }
        }

        let mut rows = BTreeMap::new();
        for item in LineItem::ALL {
            let row = match self.row_value(item) {
                Some(value) => self.read_row(item, value),
                None => {
                    warn!(row = %item, "statement row missing, defaulting to 0");
                    Row::zeros(self.headers.len())
                }
            };
            rows.insert(item, row);
        }

        let ladder = StatementLadder::new(self.headers.clone(), forecast_start, rows)?;
        Ok((ladder, self.valuation_parameters.clone()))
    }

    fn forecast_start(&self, default_forecast_years: usize) -> ModelResult<usize> {
        if self.headers.is_empty() {
            return Err(ModelError::validation("headers must not be empty"));
        }
        if self.headers.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ModelError::validation("headers must be strictly increasing"));
        }
        let start = match self.first_forecast_year {
            Some(year) => self.headers.iter().position(|h| *h == year).ok_or_else(|| {
                ModelError::validation(format!("first forecast year {year} is not in headers"))
            })?,
            None => self.headers.len().saturating_sub(default_forecast_years),
        };
        if start == 0 {
            return Err(ModelError::validation(
                "headers need at least one historical year",
            ));
        }
        if start >= self.headers.len() {
            return Err(ModelError::validation(
                "headers need at least one forecast year",
            ));
        }
        Ok(start)
    }

    fn row_value(&self, item: LineItem) -> Option<&Value> {
        self.data
            .iter()
            .find(|(key, _)| LineItem::from_key(key) == Some(item))
            .map(|(_, value)| value)
    }

    fn read_row(&self, item: LineItem, value: &Value) -> Row {
        let mut missing = 0usize;
        let cells = self
            .headers
            .iter()
            .enumerate()
            .map(|(idx, year)| {
                let cell = match value {
                    Value::Array(cells) => cells.get(idx),
                    Value::Object(cells) => cells
                        .iter()
                        .find(|(label, _)| label.parse::<Year>().ok() == Some(*year))
                        .map(|(_, v)| v),
                    _ => None,
                };
                match cell {
                    Some(v) if !v.is_null() => coerce_cell(item, *year, v),
                    _ => {
                        missing += 1;
                        0.0
                    }
                }
            })
            .collect();
        if missing > 0 {
            warn!(row = %item, missing, "statement cells missing, defaulting to 0");
        }
        Row(cells)
    }
}

pub fn coerce_cell(item: LineItem, year: Year, value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .replace(',', "")
            .trim()
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => v,
        _ => {
            warn!(row = %item, %year, %value, "non-numeric statement cell, defaulting to 0");
            0.0
        }
    }
}
