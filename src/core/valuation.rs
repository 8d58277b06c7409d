use tracing::debug;

use super::ladder::StatementLadder;
use super::types::{EnterpriseValue, Valuation, ValuationParameters, ValuationSource};
use crate::error::{ModelError, ModelResult};

pub const PERPETUAL_GROWTH_RATE: f64 = 0.02;

/// Discounts the forecast-window FCF (oldest first) plus a Gordon-growth
/// terminal value on the last year. The discount rate must exceed
/// [`PERPETUAL_GROWTH_RATE`].
pub fn compute_enterprise_value(
    params: &ValuationParameters,
    forecast_fcf: &[f64],
) -> ModelResult<f64> {
    let r = params.discount_rate / 100.0;
    if !r.is_finite() || r <= PERPETUAL_GROWTH_RATE {
        return Err(ModelError::valuation(format!(
            "discount rate {}% must exceed the {}% perpetual growth rate",
            params.discount_rate,
            PERPETUAL_GROWTH_RATE * 100.0
        )));
    }
    let Some(&last_fcf) = forecast_fcf.last() else {
        return Err(ModelError::valuation("no forecast years to discount"));
    };
    if forecast_fcf.iter().any(|fcf| !fcf.is_finite()) {
        return Err(ModelError::valuation("forecast free cash flow is not finite"));
    }

    let discounted: f64 = forecast_fcf
        .iter()
        .enumerate()
        .map(|(i, fcf)| fcf / (1.0 + r).powi(i as i32 + 1))
        .sum();
    let terminal_value = last_fcf * (1.0 + PERPETUAL_GROWTH_RATE) / (r - PERPETUAL_GROWTH_RATE);
    let terminal_pv = terminal_value / (1.0 + r).powi(forecast_fcf.len() as i32);
    let enterprise_value = discounted + terminal_pv;

    if !enterprise_value.is_finite() {
        return Err(ModelError::valuation("enterprise value is not finite"));
    }
    debug!(enterprise_value, discounted, terminal_pv, "enterprise value computed");
    Ok(enterprise_value)
}

pub fn compute_equity_value(enterprise_value: f64, params: &ValuationParameters) -> f64 {
    enterprise_value - params.total_debt + params.market_investments
}

pub fn compute_price_per_share(equity_value: f64, params: &ValuationParameters) -> ModelResult<f64> {
    let Some(shares) = params.share_count() else {
        return Err(ModelError::validation(
            "price per share needs sharesOutstanding or currentSharePrice",
        ));
    };
    Ok(equity_value / shares)
}

/// Percent difference between model equity value and market cap; `None`
/// when market cap is zero.
pub fn compute_upside(equity_value: f64, market_cap: f64) -> Option<f64> {
    if market_cap == 0.0 {
        return None;
    }
    Some((equity_value - market_cap) / market_cap * 100.0)
}

pub fn require_upside(equity_value: f64, market_cap: f64) -> ModelResult<f64> {
    compute_upside(equity_value, market_cap)
        .ok_or_else(|| ModelError::valuation("upside is undefined for a zero market cap"))
}

impl Valuation {
    pub fn derive(enterprise_value: EnterpriseValue, params: &ValuationParameters) -> Self {
        let equity_value = compute_equity_value(enterprise_value.value, params);
        Self {
            enterprise_value,
            equity_value,
            price_per_share: params.share_count().map(|shares| equity_value / shares),
            upside: compute_upside(equity_value, params.market_cap),
        }
    }
}

pub fn value_ladder(
    ladder: &StatementLadder,
    params: &ValuationParameters,
) -> ModelResult<Valuation> {
    let value = compute_enterprise_value(params, ladder.forecast_fcf())?;
    Ok(Valuation::derive(
        EnterpriseValue {
            source: ValuationSource::Local,
            value,
        },
        params,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{reference_ladder, reference_parameters};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn params_with_rate(discount_rate: f64) -> ValuationParameters {
        ValuationParameters {
            discount_rate,
            ..reference_parameters()
        }
    }

    #[test]
    fn enterprise_value_matches_hand_computed_two_year_case() {
        // (100 * 1.1 + 100 + 100 * 1.02 / 0.08) / 1.21
        let ev = compute_enterprise_value(&params_with_rate(10.0), &[100.0, 100.0]).unwrap();
        assert_approx(ev, 13_500.0 / 11.0);
    }

    #[test]
    fn historical_fcf_is_not_discounted() {
        let ladder = reference_ladder();
        let params = reference_parameters();
        let from_ladder = value_ladder(&ladder, &params).unwrap();
        let from_forecast = compute_enterprise_value(&params, ladder.forecast_fcf()).unwrap();
        assert_eq!(ladder.forecast_fcf().len(), 5);
        assert_approx(from_ladder.enterprise_value.value, from_forecast);
        assert_eq!(from_ladder.enterprise_value.source, ValuationSource::Local);
    }

    #[test]
    fn discount_rate_at_or_below_perpetual_growth_is_rejected() {
        for rate in [2.0, 1.5, 0.0] {
            let err = compute_enterprise_value(&params_with_rate(rate), &[100.0])
                .expect_err("rate must be rejected");
            assert!(matches!(err, ModelError::Valuation(_)));
        }
    }

    #[test]
    fn empty_forecast_window_is_rejected() {
        let err = compute_enterprise_value(&reference_parameters(), &[])
            .expect_err("nothing to discount");
        assert!(matches!(err, ModelError::Valuation(_)));
    }

    #[test]
    fn equity_value_subtracts_debt_and_adds_investments() {
        let params = reference_parameters();
        assert_approx(compute_equity_value(100_000.0, &params), 97_000.0);
    }

    #[test]
    fn price_per_share_uses_millions_on_both_sides() {
        let mut params = reference_parameters();
        params.shares_outstanding = Some(10.0);
        assert_approx(compute_price_per_share(850.0, &params).unwrap(), 85.0);

        params.shares_outstanding = None;
        params.market_cap = 2_000.0;
        params.current_share_price = Some(50.0);
        // 2,000m / 50 = 40m shares
        assert_approx(compute_price_per_share(850.0, &params).unwrap(), 21.25);

        params.current_share_price = None;
        let err = compute_price_per_share(850.0, &params).expect_err("no share count");
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn upside_is_undefined_for_zero_market_cap() {
        assert_eq!(compute_upside(500.0, 0.0), None);
        let err = require_upside(500.0, 0.0).expect_err("hard upside");
        assert!(matches!(err, ModelError::Valuation(_)));
        assert_approx(compute_upside(150.0, 100.0).unwrap(), 50.0);
        assert_approx(compute_upside(80.0, 100.0).unwrap(), -20.0);
    }

    #[test]
    fn remote_enterprise_value_drives_local_downstream_values() {
        let params = reference_parameters();
        let valuation = Valuation::derive(
            EnterpriseValue {
                source: ValuationSource::Remote,
                value: 203_000.0,
            },
            &params,
        );
        assert_eq!(valuation.enterprise_value.source, ValuationSource::Remote);
        assert_approx(valuation.equity_value, 200_000.0);
        assert_approx(valuation.upside.unwrap(), 0.0);
        assert_approx(valuation.price_per_share.unwrap(), 200.0);
    }

    #[test]
    fn valuation_serializes_with_tagged_source() {
        let valuation = value_ladder(&reference_ladder(), &reference_parameters()).unwrap();
        let json = serde_json::to_string(&valuation).unwrap();
        assert!(json.contains("\"enterpriseValue\":{\"source\":\"local\""));
        assert!(json.contains("\"equityValue\""));
        assert!(json.contains("\"pricePerShare\""));
        assert!(json.contains("\"upside\""));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_rates_above_perpetual_growth_give_finite_values(
            rate_bp in 201u32..5_000,
            fcf in proptest::collection::vec(-50_000i32..50_000, 1..8)
        ) {
            let fcf: Vec<f64> = fcf.into_iter().map(f64::from).collect();
            let ev = compute_enterprise_value(&params_with_rate(rate_bp as f64 / 100.0), &fcf);
            prop_assert!(ev.map(f64::is_finite).unwrap_or(false));
        }

        #[test]
        fn prop_rates_at_or_below_perpetual_growth_fail(rate_bp in 0u32..=200) {
            let ev = compute_enterprise_value(&params_with_rate(rate_bp as f64 / 100.0), &[1.0]);
            prop_assert!(matches!(ev, Err(ModelError::Valuation(_))));
        }

        #[test]
        fn prop_upside_sign_follows_equity_vs_market_cap(
            equity in -1_000_000i64..1_000_000,
            market_cap in 1i64..1_000_000
        ) {
            let upside = compute_upside(equity as f64, market_cap as f64).unwrap();
            prop_assert_eq!(upside == 0.0, equity == market_cap);
            prop_assert_eq!(upside > 0.0, equity > market_cap);
            prop_assert_eq!(upside < 0.0, equity < market_cap);
        }
    }
}
