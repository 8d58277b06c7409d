pub mod forecast;
mod input;
mod ladder;
mod scenario;
mod sensitivity;
mod session;
mod types;
mod valuation;

#[cfg(test)]
pub(crate) mod fixtures;

pub use input::{ModelInput, coerce_cell};
pub use ladder::{LadderSnapshot, StatementLadder, coerce_typed};
pub use scenario::{
    Scenario, ScenarioStore, decode_shareable, encode_shareable, load as load_scenario, share_link,
};
pub use sensitivity::{SensitivityAxes, generate_sensitivity_matrix};
pub use session::{IdleOrigin, ModellingSession, SessionState};
pub use types::{
    AssumptionSet, EnterpriseValue, LineItem, Row, SensitivityResult, Valuation,
    ValuationParameters, ValuationSource, Year,
};
pub use valuation::{
    PERPETUAL_GROWTH_RATE, compute_enterprise_value, compute_equity_value,
    compute_price_per_share, compute_upside, require_upside, value_ladder,
};
