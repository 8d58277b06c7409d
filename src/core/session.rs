use serde::Serialize;
use tracing::{info, warn};

use super::ladder::StatementLadder;
use super::scenario::{self, Scenario, ScenarioStore};
use super::sensitivity::{SensitivityAxes, generate_sensitivity_matrix};
use super::types::{
    AssumptionSet, EnterpriseValue, LineItem, SensitivityResult, Valuation, ValuationParameters,
    ValuationSource, Year,
};
use super::valuation::value_ladder;
use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum IdleOrigin {
    Baseline,
    Named(String),
    Snapshot(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SessionState {
    Idle { origin: IdleOrigin },
    Editing,
}

/// Live modelling screen for one symbol. Every mutation recomputes the
/// ladder and the valuation before returning and discards any remote
/// enterprise value.
#[derive(Debug, Clone)]
pub struct ModellingSession {
    symbol: String,
    ladder: StatementLadder,
    parameters: ValuationParameters,
    baseline_parameters: ValuationParameters,
    state: SessionState,
    remote_enterprise_value: Option<f64>,
    valuation: Option<Valuation>,
    valuation_error: Option<String>,
}

impl ModellingSession {
    pub fn new(
        symbol: &str,
        ladder: StatementLadder,
        parameters: ValuationParameters,
    ) -> ModelResult<Self> {
        if symbol.trim().is_empty() {
            return Err(ModelError::validation("symbol must not be empty"));
        }
        parameters.validate()?;
        let mut session = Self {
            symbol: symbol.trim().to_string(),
            ladder,
            baseline_parameters: parameters.clone(),
            parameters,
            state: SessionState::Idle {
                origin: IdleOrigin::Baseline,
            },
            remote_enterprise_value: None,
            valuation: None,
            valuation_error: None,
        };
        session.revalue();
        Ok(session)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn ladder(&self) -> &StatementLadder {
        &self.ladder
    }

    pub fn parameters(&self) -> &ValuationParameters {
        &self.parameters
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == SessionState::Editing
    }

    pub fn valuation(&self) -> Option<&Valuation> {
        self.valuation.as_ref()
    }

    pub fn valuation_error(&self) -> Option<&str> {
        self.valuation_error.as_deref()
    }

    pub fn edit_driver(&mut self, item: LineItem, year: Year, raw: &str) -> ModelResult<()> {
        self.ladder.set_driver_input(item, year, raw)?;
        self.mark_editing();
        Ok(())
    }

    pub fn set_driver(&mut self, item: LineItem, year: Year, value: f64) -> ModelResult<()> {
        self.ladder.set_driver(item, year, value)?;
        self.mark_editing();
        Ok(())
    }

    pub fn update_parameters(&mut self, parameters: ValuationParameters) -> ModelResult<()> {
        parameters.validate()?;
        self.parameters = parameters;
        self.mark_editing();
        Ok(())
    }

    pub fn apply_external_scenario(&mut self, assumptions: &AssumptionSet) -> ModelResult<()> {
        self.ladder.apply_assumption_set(assumptions)?;
        info!(symbol = %self.symbol, "external assumption set applied");
        self.mark_editing();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.ladder.reset_forecast();
        self.parameters = self.baseline_parameters.clone();
        self.settle(IdleOrigin::Baseline);
    }

    pub fn save(
        &mut self,
        store: &mut ScenarioStore,
        name: &str,
        description: Option<&str>,
    ) -> ModelResult<()> {
        let saved = store.save(
            &self.symbol,
            name,
            description,
            &self.ladder.snapshot(),
            &self.parameters,
        )?;
        let name = saved.name.clone();
        self.state = SessionState::Idle {
            origin: IdleOrigin::Named(name),
        };
        Ok(())
    }

    pub fn load(&mut self, store: &ScenarioStore, index: usize) -> ModelResult<()> {
        let scenario = store.get(&self.symbol, index)?.clone();
        self.load_scenario(&scenario)
    }

    pub fn open_shared(&mut self, token: &str) -> ModelResult<()> {
        let scenario = scenario::decode_shareable(token, &self.symbol)?;
        self.load_scenario(&scenario)
    }

    pub fn share_token(&self, name: &str, description: Option<&str>) -> ModelResult<String> {
        let scenario = Scenario::new(name, description, &self.ladder.snapshot(), &self.parameters)?;
        scenario::encode_shareable(&self.symbol, &scenario)
    }

    pub fn accept_remote_enterprise_value(&mut self, value: f64) -> ModelResult<()> {
        if !value.is_finite() {
            return Err(ModelError::validation("remote enterprise value must be finite"));
        }
        self.remote_enterprise_value = Some(value);
        self.revalue();
        Ok(())
    }

    pub fn sensitivity(&self, axes: &SensitivityAxes) -> ModelResult<SensitivityResult> {
        generate_sensitivity_matrix(&self.ladder, &self.parameters, axes)
    }

    fn load_scenario(&mut self, scenario: &Scenario) -> ModelResult<()> {
        let (snapshot, parameters) = scenario::load(scenario);
        parameters.validate()?;
        self.ladder.load_snapshot(&snapshot)?;
        self.parameters = parameters;
        info!(symbol = %self.symbol, name = %scenario.name, "scenario loaded");
        self.settle(IdleOrigin::Snapshot(scenario.name.clone()));
        Ok(())
    }

    fn mark_editing(&mut self) {
        self.remote_enterprise_value = None;
        self.state = SessionState::Editing;
        self.revalue();
    }

    fn settle(&mut self, origin: IdleOrigin) {
        self.remote_enterprise_value = None;
        self.state = SessionState::Idle { origin };
        self.revalue();
    }

    fn revalue(&mut self) {
        let result = match self.remote_enterprise_value {
            Some(value) => Ok(Valuation::derive(
                EnterpriseValue {
                    source: ValuationSource::Remote,
                    value,
                },
                &self.parameters,
            )),
            None => value_ladder(&self.ladder, &self.parameters),
        };
        match result {
            Ok(valuation) => {
                self.valuation = Some(valuation);
                self.valuation_error = None;
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "valuation unavailable");
                self.valuation = None;
                self.valuation_error = Some(e.to_string());
            }
        }
    }
}
