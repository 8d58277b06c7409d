use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ladder::{LadderSnapshot, validate_shape};
use super::types::ValuationParameters;
use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ladder: LadderSnapshot,
    pub parameters: ValuationParameters,
    pub created_at: DateTime<Utc>,
}

impl Scenario {
    pub fn new(
        name: &str,
        description: Option<&str>,
        ladder: &LadderSnapshot,
        parameters: &ValuationParameters,
    ) -> ModelResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModelError::validation("scenario name must not be empty"));
        }
        Ok(Self {
            name: name.to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            ladder: ladder.clone(),
            parameters: parameters.clone(),
            created_at: Utc::now(),
        })
    }

    pub fn validate(&self) -> ModelResult<()> {
        validate_shape(
            &self.ladder.years,
            self.ladder.forecast_start,
            &self.ladder.rows,
        )?;
        self.parameters.validate()
    }
}

pub fn load(scenario: &Scenario) -> (LadderSnapshot, ValuationParameters) {
    (scenario.ladder.clone(), scenario.parameters.clone())
}

#[derive(Debug, Default)]
pub struct ScenarioStore {
    path: Option<PathBuf>,
    by_symbol: BTreeMap<String, Vec<Scenario>>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref().to_path_buf();
        let by_symbol = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| ModelError::Storage(format!("{}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| ModelError::Storage(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), "scenario store opened");
        Ok(Self {
            path: Some(path),
            by_symbol,
        })
    }

    pub fn save(
        &mut self,
        symbol: &str,
        name: &str,
        description: Option<&str>,
        ladder: &LadderSnapshot,
        parameters: &ValuationParameters,
    ) -> ModelResult<&Scenario> {
        let scenario = Scenario::new(name, description, ladder, parameters)?;
        self.by_symbol
            .entry(symbol.to_string())
            .or_default()
            .push(scenario);
        if let Err(e) = self.persist() {
            if let Some(list) = self.by_symbol.get_mut(symbol) {
                list.pop();
                if list.is_empty() {
                    self.by_symbol.remove(symbol);
                }
            }
            return Err(e);
        }
        info!(symbol, name, "scenario saved");
        self.by_symbol
            .get(symbol)
            .and_then(|list| list.last())
            .ok_or_else(|| ModelError::Storage("scenario vanished after save".to_string()))
    }

    pub fn list(&self, symbol: &str) -> &[Scenario] {
        self.by_symbol
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, symbol: &str, index: usize) -> ModelResult<&Scenario> {
        self.list(symbol).get(index).ok_or_else(|| {
            ModelError::validation(format!("no scenario {index} for {symbol}"))
        })
    }

    pub fn delete(&mut self, symbol: &str, index: usize) -> ModelResult<Scenario> {
        let Some(list) = self.by_symbol.get_mut(symbol).filter(|l| index < l.len()) else {
            return Err(ModelError::validation(format!(
                "no scenario {index} for {symbol}"
            )));
        };
        let removed = list.remove(index);
        if list.is_empty() {
            self.by_symbol.remove(symbol);
        }
        if let Err(e) = self.persist() {
            self.by_symbol
                .entry(symbol.to_string())
                .or_default()
                .insert(index, removed);
            return Err(e);
        }
        info!(symbol, name = %removed.name, "scenario deleted");
        Ok(removed)
    }

    pub fn persist(&self) -> ModelResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.by_symbol)
            .map_err(|e| ModelError::Storage(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| ModelError::Storage(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "scenario store written");
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ShareEnvelope {
    symbol: String,
    scenario: Scenario,
}

/// URL-safe base64 of `{symbol, scenario}` JSON. Not signed.
pub fn encode_shareable(symbol: &str, scenario: &Scenario) -> ModelResult<String> {
    let envelope = ShareEnvelope {
        symbol: symbol.to_string(),
        scenario: scenario.clone(),
    };
    let json = serde_json::to_vec(&envelope)
        .map_err(|e| ModelError::validation(format!("scenario cannot be encoded: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_shareable(token: &str, expected_symbol: &str) -> ModelResult<Scenario> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim().trim_end_matches('='))
        .map_err(|e| ModelError::validation(format!("share token is not valid base64: {e}")))?;
    let envelope: ShareEnvelope = serde_json::from_slice(&bytes)
        .map_err(|e| ModelError::validation(format!("share token is not a scenario: {e}")))?;
    if envelope.symbol != expected_symbol {
        return Err(ModelError::validation(format!(
            "scenario was shared for {}, not {expected_symbol}",
            envelope.symbol
        )));
    }
    envelope.scenario.validate()?;
    Ok(envelope.scenario)
}

pub fn share_link(base_url: &str, symbol: &str, scenario: &Scenario) -> ModelResult<String> {
    let token = encode_shareable(symbol, scenario)?;
    let separator = if base_url.contains('?') { '&' } else { '?' };
    Ok(format!("{base_url}{separator}scenario={token}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{reference_ladder, reference_parameters, y};
    use crate::core::types::LineItem;

    fn temp_store_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "valuer-scenarios-{tag}-{}.json",
            std::process::id()
        ))
    }

    #[test]
    fn save_load_round_trip_survives_later_edits() {
        let mut ladder = reference_ladder();
        let params = reference_parameters();
        let mut store = ScenarioStore::new();
        let saved_snapshot = ladder.snapshot();
        store
            .save("ACME", "base", Some("as reported"), &saved_snapshot, &params)
            .unwrap();

        ladder.set_driver(LineItem::IcGrowth, y(2025), 11.0).unwrap();
        ladder
            .set_driver(LineItem::EarningsMargin, y(2027), 5.0)
            .unwrap();

        let (snapshot, loaded_params) = load(store.get("ACME", 0).unwrap());
        ladder.load_snapshot(&snapshot).unwrap();
        assert_eq!(ladder.snapshot(), saved_snapshot);
        assert_eq!(loaded_params, params);
    }

    #[test]
    fn duplicate_names_are_kept_and_deleted_by_index() {
        let ladder = reference_ladder().snapshot();
        let params = reference_parameters();
        let mut store = ScenarioStore::new();
        store.save("ACME", "bull", None, &ladder, &params).unwrap();
        store.save("ACME", "bull", None, &ladder, &params).unwrap();
        store.save("ACME", "bear", None, &ladder, &params).unwrap();
        store.save("OTHER", "bull", None, &ladder, &params).unwrap();

        assert_eq!(store.list("ACME").len(), 3);
        let removed = store.delete("ACME", 1).unwrap();
        assert_eq!(removed.name, "bull");
        let names: Vec<&str> = store.list("ACME").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["bull", "bear"]);
        assert_eq!(store.list("OTHER").len(), 1);
        assert!(store.list("NONE").is_empty());

        let err = store.delete("ACME", 5).expect_err("out of range");
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut store = ScenarioStore::new();
        let err = store
            .save(
                "ACME",
                "   ",
                None,
                &reference_ladder().snapshot(),
                &reference_parameters(),
            )
            .expect_err("blank name");
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn share_token_round_trips_for_the_same_symbol() {
        let scenario = Scenario::new(
            "bull",
            Some("faster growth"),
            &reference_ladder().snapshot(),
            &reference_parameters(),
        )
        .unwrap();
        let token = encode_shareable("ACME", &scenario).unwrap();
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        let decoded = decode_shareable(&token, "ACME").unwrap();
        assert_eq!(decoded, scenario);
    }

    #[test]
    fn share_token_for_another_symbol_is_rejected() {
        let scenario = Scenario::new(
            "bull",
            None,
            &reference_ladder().snapshot(),
            &reference_parameters(),
        )
        .unwrap();
        let token = encode_shareable("ACME", &scenario).unwrap();
        let err = decode_shareable(&token, "OTHER").expect_err("symbol mismatch");
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn malformed_tokens_are_validation_errors() {
        for token in ["!!!", "bm90IGpzb24"] {
            let err = decode_shareable(token, "ACME").expect_err("bad token");
            assert!(matches!(err, ModelError::Validation(_)));
        }
    }

    #[test]
    fn shared_scenario_with_missing_rows_is_rejected() {
        let mut ladder = reference_ladder().snapshot();
        ladder.rows.remove(&LineItem::TotalRevenue);
        let scenario = Scenario::new("broken", None, &ladder, &reference_parameters()).unwrap();
        let token = encode_shareable("ACME", &scenario).unwrap();
        let err = decode_shareable(&token, "ACME").expect_err("missing row");
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn share_link_appends_query_parameter() {
        let scenario = Scenario::new(
            "bull",
            None,
            &reference_ladder().snapshot(),
            &reference_parameters(),
        )
        .unwrap();
        let link = share_link("https://example.test/model/ACME", "ACME", &scenario).unwrap();
        assert!(link.starts_with("https://example.test/model/ACME?scenario="));
        let link = share_link("https://example.test/model?symbol=ACME", "ACME", &scenario).unwrap();
        assert!(link.contains("?symbol=ACME&scenario="));
    }

    #[test]
    fn file_backed_store_reopens_with_saved_scenarios() {
        let path = temp_store_path("reopen");
        let _ = fs::remove_file(&path);
        {
            let mut store = ScenarioStore::open(&path).unwrap();
            store
                .save(
                    "ACME",
                    "base",
                    None,
                    &reference_ladder().snapshot(),
                    &reference_parameters(),
                )
                .unwrap();
        }
        let store = ScenarioStore::open(&path).unwrap();
        assert_eq!(store.list("ACME").len(), 1);
        assert_eq!(store.list("ACME")[0].ladder, reference_ladder().snapshot());
        let _ = fs::remove_file(&path);
    }

    fn store_in_removed_dir(tag: &str, seed: usize) -> ScenarioStore {
        let dir = std::env::temp_dir().join(format!("valuer-store-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut store = ScenarioStore::open(dir.join("scenarios.json")).unwrap();
        for i in 0..seed {
            store
                .save(
                    "ACME",
                    &format!("s{i}"),
                    None,
                    &reference_ladder().snapshot(),
                    &reference_parameters(),
                )
                .unwrap();
        }
        fs::remove_dir_all(&dir).unwrap();
        store
    }

    #[test]
    fn failed_write_leaves_no_unsaved_scenario_behind() {
        let mut store = store_in_removed_dir("save", 0);
        let err = store
            .save(
                "ACME",
                "base",
                None,
                &reference_ladder().snapshot(),
                &reference_parameters(),
            )
            .expect_err("directory is gone");
        assert!(matches!(err, ModelError::Storage(_)));
        assert!(store.list("ACME").is_empty());
    }

    #[test]
    fn failed_write_keeps_deleted_scenario_in_place() {
        let mut store = store_in_removed_dir("delete", 3);
        let err = store.delete("ACME", 1).expect_err("directory is gone");
        assert!(matches!(err, ModelError::Storage(_)));
        let names: Vec<&str> = store.list("ACME").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["s0", "s1", "s2"]);

        let mut single = store_in_removed_dir("delete-last", 1);
        assert!(single.delete("ACME", 0).is_err());
        assert_eq!(single.list("ACME").len(), 1);
    }
}
