use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::SensitivityAxes;
use crate::error::{ModelError, ModelResult};

pub const DEFAULT_FORECAST_YEARS: usize = 5;
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(8);
pub const REMOTE_TIMEOUT_RANGE_SECS: (u64, u64) = (5, 10);
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub forecast_years: usize,
    pub sensitivity: SensitivityAxes,
    pub remote_url: Option<String>,
    pub remote_timeout: Duration,
    pub scenario_path: Option<PathBuf>,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            forecast_years: DEFAULT_FORECAST_YEARS,
            sensitivity: SensitivityAxes::default(),
            remote_url: None,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            scenario_path: None,
            port: DEFAULT_PORT,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> ModelResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ModelResult<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = var("VALUER_REMOTE_URL") {
            config.remote_url = Some(url);
        }
        if let Some(secs) = var("VALUER_REMOTE_TIMEOUT_SECS") {
            let secs = secs.parse::<u64>().map_err(|_| {
                ModelError::validation(format!("VALUER_REMOTE_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config.remote_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = var("VALUER_SCENARIO_PATH") {
            config.scenario_path = Some(PathBuf::from(path));
        }
        if let Some(port) = var("VALUER_PORT") {
            config.port = port
                .parse::<u16>()
                .map_err(|_| ModelError::validation(format!("VALUER_PORT is not a port: {port}")))?;
        }
        if let Some(years) = var("VALUER_FORECAST_YEARS") {
            config.forecast_years = years.parse::<usize>().map_err(|_| {
                ModelError::validation(format!("VALUER_FORECAST_YEARS is not a number: {years}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.forecast_years == 0 {
            return Err(ModelError::validation("forecast window must be at least one year"));
        }
        let (min, max) = REMOTE_TIMEOUT_RANGE_SECS;
        let timeout = self.remote_timeout.as_secs_f64();
        if timeout < min as f64 || timeout > max as f64 {
            return Err(ModelError::validation(format!(
                "remote timeout must be between {min} and {max} seconds"
            )));
        }
        if let Some(url) = &self.remote_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ModelError::validation(format!(
                "remote URL must be http(s): {url}"
            )));
        }
        self.sensitivity.validate()
    }
}
