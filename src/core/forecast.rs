//! Single-year line item formulas. Growth rates, margins and AROIC are in
//! percent. Degenerate denominators produce `f64::NAN` instead of panicking.

pub fn revenue(prior_revenue: f64, revenue_growth: f64) -> f64 {
    prior_revenue * (1.0 + revenue_growth / 100.0)
}

pub fn economic_earnings(revenue: f64, earnings_margin: f64) -> f64 {
    revenue * earnings_margin / 100.0
}

pub fn invested_capital(prior_ic: f64, ic_growth: f64) -> f64 {
    prior_ic * (1.0 + ic_growth / 100.0)
}

pub fn ic_change(ic: f64, prior_ic: f64) -> f64 {
    ic - prior_ic
}

pub fn aroic(earnings: f64, ic: f64) -> f64 {
    if ic == 0.0 {
        return f64::NAN;
    }
    earnings / ic * 100.0
}

pub fn free_cash_flow(earnings: f64, ic_change: f64) -> f64 {
    earnings - ic_change
}

/// Zero when the prior year's FCF is zero; the denominator is `|prior|` so a
/// move from negative to less negative reads as growth.
pub fn fcf_growth(fcf: f64, prior_fcf: f64) -> f64 {
    if prior_fcf == 0.0 {
        return 0.0;
    }
    (fcf - prior_fcf) / prior_fcf.abs() * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorYear {
    pub revenue: f64,
    pub invested_capital: f64,
    pub free_cash_flow: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drivers {
    pub revenue_growth: f64,
    pub earnings_margin: f64,
    pub ic_growth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastYear {
    pub total_revenue: f64,
    pub economic_earnings: f64,
    pub invested_capital: f64,
    pub ic_change: f64,
    pub aroic: f64,
    pub free_cash_flow: f64,
    pub fcf_growth: f64,
}

pub fn forecast_year(prior: PriorYear, drivers: Drivers) -> ForecastYear {
    let total_revenue = revenue(prior.revenue, drivers.revenue_growth);
    let economic_earnings = economic_earnings(total_revenue, drivers.earnings_margin);
    let invested_capital = invested_capital(prior.invested_capital, drivers.ic_growth);
    let ic_change = ic_change(invested_capital, prior.invested_capital);
    let free_cash_flow = free_cash_flow(economic_earnings, ic_change);
    ForecastYear {
        total_revenue,
        economic_earnings,
        invested_capital,
        ic_change,
        aroic: aroic(economic_earnings, invested_capital),
        free_cash_flow,
        fcf_growth: fcf_growth(free_cash_flow, prior.free_cash_flow),
    }
}
