use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::core::{LineItem, StatementLadder, ValuationParameters, Year};
use crate::error::ExternalServiceError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationPayload {
    pub total_revenue: BTreeMap<Year, Option<f64>>,
    pub revenue_gr: BTreeMap<Year, Option<f64>>,
    pub economic_earnings: BTreeMap<Year, Option<f64>>,
    pub earnings_margin: BTreeMap<Year, Option<f64>>,
    pub aroic: BTreeMap<Year, Option<f64>>,
    pub ic: BTreeMap<Year, Option<f64>>,
    pub ic_gr: BTreeMap<Year, Option<f64>>,
    pub ic_chg: BTreeMap<Year, Option<f64>>,
    pub valuation_parameters: WireParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireParameters {
    pub shareholder_ratio: f64,
    pub discount_rate: f64,
    pub total_debt: f64,
    /// The remote calculator treats `0` and "not provided" differently, so a
    /// zero amount goes out as `""`.
    #[serde(serialize_with = "empty_when_zero")]
    pub market_investment: f64,
    pub market_cap: f64,
    pub interim_conversion: f64,
}

impl ValuationPayload {
    pub fn from_ladder(ladder: &StatementLadder, params: &ValuationParameters) -> Self {
        let row = |item: LineItem| -> BTreeMap<Year, Option<f64>> {
            ladder
                .years()
                .iter()
                .zip(ladder.row(item))
                .map(|(year, v)| (*year, v.is_finite().then_some(*v)))
                .collect()
        };
        Self {
            total_revenue: row(LineItem::TotalRevenue),
            revenue_gr: row(LineItem::RevenueGrowth),
            economic_earnings: row(LineItem::EconomicEarnings),
            earnings_margin: row(LineItem::EarningsMargin),
            aroic: row(LineItem::Aroic),
            ic: row(LineItem::InvestedCapital),
            ic_gr: row(LineItem::IcGrowth),
            ic_chg: row(LineItem::IcChange),
            valuation_parameters: WireParameters {
                shareholder_ratio: params.shareholder_ratio,
                discount_rate: params.discount_rate,
                total_debt: params.total_debt,
                market_investment: params.market_investments,
                market_cap: params.market_cap,
                interim_conversion: params.interim_conversion,
            },
        }
    }
}

fn empty_when_zero<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if *value == 0.0 {
        serializer.serialize_str("")
    } else {
        serializer.serialize_f64(*value)
    }
}

/// The sensitivity endpoint returns its grid as a JSON-encoded string. It
/// must decode to a `rows x cols` array of finite numbers.
pub fn parse_matrix_field(
    field: Option<&Value>,
    rows: usize,
    cols: usize,
) -> Result<Vec<Vec<f64>>, ExternalServiceError> {
    let Some(Value::String(encoded)) = field else {
        return Err(ExternalServiceError::InvalidResponse(
            "matrix field must be a JSON string".to_string(),
        ));
    };
    let decoded: Value = serde_json::from_str(encoded)?;
    let Value::Array(grid) = decoded else {
        return Err(ExternalServiceError::InvalidResponse(
            "matrix is not an array".to_string(),
        ));
    };
    if grid.len() != rows {
        return Err(ExternalServiceError::InvalidResponse(format!(
            "matrix has {} rows, expected {rows}",
            grid.len()
        )));
    }

    grid.iter()
        .enumerate()
        .map(|(g, row)| {
            let Value::Array(cells) = row else {
                return Err(ExternalServiceError::InvalidResponse(format!(
                    "matrix row {g} is not an array"
                )));
            };
            if cells.len() != cols {
                return Err(ExternalServiceError::InvalidResponse(format!(
                    "matrix row {g} has {} cells, expected {cols}",
                    cells.len()
                )));
            }
            cells
                .iter()
                .map(|cell| {
                    cell.as_f64().filter(|v| v.is_finite()).ok_or_else(|| {
                        ExternalServiceError::InvalidResponse(format!(
                            "matrix row {g} has a non-numeric cell {cell}"
                        ))
                    })
                })
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect()
}
