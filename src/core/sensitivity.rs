use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ladder::StatementLadder;
use super::types::{LineItem, SensitivityResult, ValuationParameters, ValuationSource};
use super::valuation::{compute_enterprise_value, compute_equity_value, compute_upside};
use crate::error::{ModelError, ModelResult};

pub const MAX_AXIS_POINTS: usize = 101;

/// Growth points are absolute percentages; margin points are offsets around
/// the first forecast year's margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityAxes {
    pub growth_start: f64,
    pub growth_step: f64,
    pub growth_points: usize,
    pub margin_span: f64,
    pub margin_step: f64,
}

impl Default for SensitivityAxes {
    fn default() -> Self {
        Self {
            growth_start: -2.0,
            growth_step: 2.0,
            growth_points: 7,
            margin_span: 2.0,
            margin_step: 1.0,
        }
    }
}

impl SensitivityAxes {
    pub fn validate(&self) -> ModelResult<()> {
        if self.growth_points == 0 {
            return Err(ModelError::validation("growth axis needs at least one point"));
        }
        if !self.growth_start.is_finite() || !self.growth_step.is_finite() || self.growth_step <= 0.0
        {
            return Err(ModelError::validation("growth axis step must be > 0"));
        }
        if !self.margin_span.is_finite() || self.margin_span < 0.0 {
            return Err(ModelError::validation("margin span must be >= 0"));
        }
        if !self.margin_step.is_finite() || self.margin_step <= 0.0 {
            return Err(ModelError::validation("margin axis step must be > 0"));
        }
        if self.growth_points > MAX_AXIS_POINTS
            || (2.0 * self.margin_span / self.margin_step).round() >= MAX_AXIS_POINTS as f64
        {
            return Err(ModelError::validation(format!(
                "sensitivity axes are limited to {MAX_AXIS_POINTS} points each"
            )));
        }
        Ok(())
    }

    pub fn growth_axis(&self) -> Vec<f64> {
        (0..self.growth_points)
            .map(|i| self.growth_start + self.growth_step * i as f64)
            .collect()
    }

    pub fn margin_axis(&self, center: f64) -> Vec<f64> {
        let points = (2.0 * self.margin_span / self.margin_step).round() as usize + 1;
        (0..points)
            .map(|i| center - self.margin_span + self.margin_step * i as f64)
            .collect()
    }
}

pub fn generate_sensitivity_matrix(
    ladder: &StatementLadder,
    params: &ValuationParameters,
    axes: &SensitivityAxes,
) -> ModelResult<SensitivityResult> {
    axes.validate()?;
    let center = ladder.row(LineItem::EarningsMargin)[ladder.forecast_start()];
    let growth_axis = axes.growth_axis();
    let margin_axis = axes.margin_axis(center);

    let matrix = growth_axis
        .iter()
        .map(|growth| {
            margin_axis
                .iter()
                .map(|margin| cell_upside(ladder, params, *growth, *margin))
                .collect::<ModelResult<Vec<Option<f64>>>>()
        })
        .collect::<ModelResult<Vec<Vec<Option<f64>>>>>()?;

    debug!(
        rows = growth_axis.len(),
        cols = margin_axis.len(),
        "sensitivity grid computed"
    );
    Ok(SensitivityResult {
        source: ValuationSource::Local,
        growth_axis,
        margin_axis,
        matrix,
    })
}

fn cell_upside(
    ladder: &StatementLadder,
    params: &ValuationParameters,
    growth: f64,
    margin: f64,
) -> ModelResult<Option<f64>> {
    let hypothetical = ladder.with_uniform_drivers(growth, margin);
    let enterprise_value = compute_enterprise_value(params, hypothetical.forecast_fcf())?;
    let equity_value = compute_equity_value(enterprise_value, params);
    Ok(compute_upside(equity_value, params.market_cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{reference_ladder, reference_parameters};
    use crate::core::valuation::value_ladder;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn default_axes_span_the_documented_ranges() {
        let axes = SensitivityAxes::default();
        assert_eq!(
            axes.growth_axis(),
            vec![-2.0, 0.0, 2.0, 4.0, 6.0, 8.0, 10.0]
        );
        assert_eq!(axes.margin_axis(30.0), vec![28.0, 29.0, 30.0, 31.0, 32.0]);
    }

    #[test]
    fn grid_has_axis_shape_and_leaves_ladder_untouched() {
        let ladder = reference_ladder();
        let before = ladder.snapshot();
        let result =
            generate_sensitivity_matrix(&ladder, &reference_parameters(), &SensitivityAxes::default())
                .unwrap();

        assert_eq!(result.matrix.len(), 7);
        assert!(result.matrix.iter().all(|row| row.len() == 5));
        assert!(result.matrix.iter().flatten().all(|v| v.is_some_and(f64::is_finite)));
        assert_eq!(result.source, ValuationSource::Local);
        assert_eq!(ladder.snapshot(), before);
    }

    #[test]
    fn cell_matches_direct_valuation_of_the_hypothetical_ladder() {
        let ladder = reference_ladder();
        let params = reference_parameters();
        let result =
            generate_sensitivity_matrix(&ladder, &params, &SensitivityAxes::default()).unwrap();

        let direct = value_ladder(&ladder.with_uniform_drivers(6.0, 31.0), &params).unwrap();
        assert_approx(result.matrix[4][3].unwrap(), direct.upside.unwrap());
    }

    #[test]
    fn upside_rises_with_growth_and_margin() {
        let result = generate_sensitivity_matrix(
            &reference_ladder(),
            &reference_parameters(),
            &SensitivityAxes::default(),
        )
        .unwrap();
        let grid: Vec<Vec<f64>> = result
            .matrix
            .iter()
            .map(|row| row.iter().map(|v| v.unwrap()).collect())
            .collect();
        for g in 1..grid.len() {
            for m in 0..grid[g].len() {
                assert!(grid[g][m] > grid[g - 1][m]);
            }
        }
        for row in &grid {
            assert!(row.windows(2).all(|pair| pair[1] > pair[0]));
        }
    }

    #[test]
    fn zero_market_cap_keeps_grid_shape_with_undefined_cells() {
        let mut params = reference_parameters();
        params.market_cap = 0.0;
        let result =
            generate_sensitivity_matrix(&reference_ladder(), &params, &SensitivityAxes::default())
                .unwrap();
        assert_eq!(result.matrix.len(), 7);
        assert!(result.matrix.iter().all(|row| row.len() == 5));
        assert!(result.matrix.iter().flatten().all(Option::is_none));

        let json = serde_json::to_value(&result).unwrap();
        assert!(json["matrix"][0][0].is_null());
    }

    #[test]
    fn low_discount_rate_still_fails_the_sweep() {
        let mut params = reference_parameters();
        params.discount_rate = 2.0;
        let err = generate_sensitivity_matrix(&reference_ladder(), &params, &SensitivityAxes::default())
            .expect_err("discount rate at perpetual growth");
        assert!(matches!(err, ModelError::Valuation(_)));
    }

    #[test]
    fn oversized_axes_are_rejected() {
        let tiny_step = SensitivityAxes {
            margin_step: 1e-300,
            ..SensitivityAxes::default()
        };
        assert!(matches!(tiny_step.validate(), Err(ModelError::Validation(_))));

        let many_growth = SensitivityAxes {
            growth_points: MAX_AXIS_POINTS + 1,
            ..SensitivityAxes::default()
        };
        assert!(matches!(many_growth.validate(), Err(ModelError::Validation(_))));

        let widest = SensitivityAxes {
            growth_points: MAX_AXIS_POINTS,
            margin_span: 50.0,
            margin_step: 1.0,
            ..SensitivityAxes::default()
        };
        assert!(widest.validate().is_ok());
        let rounds_over = SensitivityAxes {
            margin_span: 50.3,
            margin_step: 1.0,
            ..SensitivityAxes::default()
        };
        assert!(rounds_over.validate().is_err());
        assert_eq!(widest.margin_axis(30.0).len(), MAX_AXIS_POINTS);
    }

    #[test]
    fn invalid_axes_are_rejected() {
        let axes = SensitivityAxes {
            growth_step: 0.0,
            ..SensitivityAxes::default()
        };
        let err = generate_sensitivity_matrix(&reference_ladder(), &reference_parameters(), &axes)
            .expect_err("zero step");
        assert!(matches!(err, ModelError::Validation(_)));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_grid_shape_follows_axes(
            growth_points in 1usize..10,
            span_tenths in 0u32..40,
            rate_bp in 300u32..2_000
        ) {
            let axes = SensitivityAxes {
                growth_points,
                margin_span: span_tenths as f64 / 10.0,
                margin_step: 0.5,
                ..SensitivityAxes::default()
            };
            let mut params = reference_parameters();
            params.discount_rate = rate_bp as f64 / 100.0;
            let result = generate_sensitivity_matrix(&reference_ladder(), &params, &axes).unwrap();

            prop_assert_eq!(result.matrix.len(), result.growth_axis.len());
            prop_assert_eq!(result.growth_axis.len(), growth_points);
            for row in &result.matrix {
                prop_assert_eq!(row.len(), result.margin_axis.len());
                prop_assert!(row.iter().all(|v| v.is_some_and(f64::is_finite)));
            }
        }
    }
}
