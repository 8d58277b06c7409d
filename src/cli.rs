use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::EngineConfig;
use crate::core::{
    ModelInput, Scenario, StatementLadder, ValuationParameters, encode_shareable,
    generate_sensitivity_matrix, share_link, value_ladder,
};
use crate::error::{ModelError, ModelResult};
use crate::remote::{RemoteValuationClient, sensitivity_with_fallback, value_with_fallback};

#[derive(Parser, Debug)]
#[command(
    name = "valuer",
    about = "Equity valuation: statement forecast, DCF, sensitivity grid and shareable scenarios"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    #[arg(long, global = true, help = "Remote valuation calculator base URL")]
    remote_url: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Remote calculator timeout in seconds (5-10)"
    )]
    remote_timeout_secs: Option<u64>,
    #[arg(long, global = true, help = "JSON file backing the scenario store")]
    scenario_path: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "Trailing headers treated as forecast when the input names no first forecast year"
    )]
    forecast_years: Option<usize>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the valuation of an input document as JSON.
    Value {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, help = "Current share price, used when no share count is given")]
        share_price: Option<f64>,
    },
    /// Print the growth x margin upside grid as JSON.
    Sensitivity {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print a share token (or link, with --base-url) for the input's forecast.
    Share {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },
}

impl Cli {
    pub fn apply(&self, mut config: EngineConfig) -> ModelResult<EngineConfig> {
        if let Some(url) = &self.remote_url {
            config.remote_url = Some(url.clone());
        }
        if let Some(secs) = self.remote_timeout_secs {
            config.remote_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = &self.scenario_path {
            config.scenario_path = Some(path.clone());
        }
        if let Some(years) = self.forecast_years {
            config.forecast_years = years;
        }
        if let Command::Serve { port: Some(port) } = self.command {
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }
}

fn read_input(path: &Path, config: &EngineConfig) -> ModelResult<(StatementLadder, ValuationParameters)> {
    let raw = fs::read_to_string(path)
        .map_err(|e| ModelError::validation(format!("{}: {e}", path.display())))?;
    ModelInput::from_json(&raw)?.build(config.forecast_years)
}

fn to_json<T: serde::Serialize>(value: &T) -> ModelResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ModelError::validation(format!("output cannot be encoded: {e}")))
}

fn remote_client(config: &EngineConfig) -> ModelResult<Option<RemoteValuationClient>> {
    config
        .remote_url
        .as_deref()
        .map(|url| RemoteValuationClient::new(url, config.remote_timeout))
        .transpose()
}

pub async fn execute(command: &Command, config: &EngineConfig) -> ModelResult<String> {
    match command {
        Command::Serve { .. } => Err(ModelError::validation(
            "serve is handled by the server entry point",
        )),
        Command::Value { input, share_price } => {
            let (ladder, mut params) = read_input(input, config)?;
            if let Some(price) = share_price {
                params.current_share_price = Some(*price);
                params.validate()?;
            }
            let valuation = match remote_client(config)? {
                Some(remote) => value_with_fallback(&remote, &ladder, &params).await?,
                None => value_ladder(&ladder, &params)?,
            };
            info!(
                source = ?valuation.enterprise_value.source,
                enterprise_value = valuation.enterprise_value.value,
                "valuation complete"
            );
            to_json(&valuation)
        }
        Command::Sensitivity { input } => {
            let (ladder, params) = read_input(input, config)?;
            let result = match remote_client(config)? {
                Some(remote) => {
                    sensitivity_with_fallback(&remote, &ladder, &params, &config.sensitivity)
                        .await?
                }
                None => generate_sensitivity_matrix(&ladder, &params, &config.sensitivity)?,
            };
            to_json(&result)
        }
        Command::Share {
            input,
            symbol,
            name,
            description,
            base_url,
        } => {
            let (ladder, params) = read_input(input, config)?;
            let scenario = Scenario::new(name, description.as_deref(), &ladder.snapshot(), &params)?;
            match base_url {
                Some(base_url) => share_link(base_url, symbol, &scenario),
                None => encode_shareable(symbol, &scenario),
            }
        }
    }
}
