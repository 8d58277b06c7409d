use std::collections::BTreeMap;

use super::ladder::StatementLadder;
use super::types::{LineItem, Row, ValuationParameters, Year};

pub fn y(year: i32) -> Year {
    Year(year)
}

pub fn reference_ladder() -> StatementLadder {
    let years: Vec<Year> = (2018..=2028).map(Year).collect();
    let hist_revenue = [30_000.0, 31_500.0, 32_800.0, 34_500.0, 36_900.0, 38_328.0];
    let hist_margin = [28.0, 28.5, 29.0, 29.5, 30.0, 30.0];
    let hist_ic = [20_000.0, 20_600.0, 21_200.0, 21_900.0, 22_500.0, 23_000.0];

    let mut revenue = Vec::new();
    let mut growth = Vec::new();
    let mut earnings = Vec::new();
    let mut margin = Vec::new();
    let mut ic = Vec::new();
    let mut ic_growth = Vec::new();
    let mut ic_change = Vec::new();
    let mut aroic = Vec::new();
    let mut fcf = Vec::new();
    let mut fcf_growth = Vec::new();

    for i in 0..hist_revenue.len() {
        let e = hist_revenue[i] * hist_margin[i] / 100.0;
        let (g, icg, icc) = if i == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                (hist_revenue[i] / hist_revenue[i - 1] - 1.0) * 100.0,
                (hist_ic[i] / hist_ic[i - 1] - 1.0) * 100.0,
                hist_ic[i] - hist_ic[i - 1],
            )
        };
        let f = e - icc;
        let fg = match fcf.last() {
            Some(prior) => (f - prior) / f64::abs(*prior) * 100.0,
            None => 0.0,
        };
        revenue.push(hist_revenue[i]);
        growth.push(g);
        earnings.push(e);
        margin.push(hist_margin[i]);
        ic.push(hist_ic[i]);
        ic_growth.push(icg);
        ic_change.push(icc);
        aroic.push(e / hist_ic[i] * 100.0);
        fcf.push(f);
        fcf_growth.push(fg);
    }

    let forecast_growth = [2.0, 4.0, 4.0, 4.0, 4.0];
    for g in forecast_growth {
        growth.push(g);
        margin.push(30.0);
        ic_growth.push(3.0);
        for row in [
            &mut revenue,
            &mut earnings,
            &mut ic,
            &mut ic_change,
            &mut aroic,
            &mut fcf,
            &mut fcf_growth,
        ] {
            row.push(0.0);
        }
    }

    let rows: BTreeMap<LineItem, Row> = [
        (LineItem::TotalRevenue, revenue),
        (LineItem::RevenueGrowth, growth),
        (LineItem::EconomicEarnings, earnings),
        (LineItem::EarningsMargin, margin),
        (LineItem::InvestedCapital, ic),
        (LineItem::IcGrowth, ic_growth),
        (LineItem::IcChange, ic_change),
        (LineItem::Aroic, aroic),
        (LineItem::FreeCashFlow, fcf),
        (LineItem::FcfGrowth, fcf_growth),
    ]
    .into_iter()
    .map(|(item, cells)| (item, Row(cells)))
    .collect();

    StatementLadder::new(years, 6, rows).expect("reference ladder is well formed")
}

pub fn reference_parameters() -> ValuationParameters {
    ValuationParameters {
        shareholder_ratio: 100.0,
        discount_rate: 8.0,
        total_debt: 5_000.0,
        market_investments: 2_000.0,
        market_cap: 200_000.0,
        interim_conversion: 0.33,
        shares_outstanding: Some(1_000.0),
        current_share_price: None,
    }
}
