mod payload;

pub use payload::{ValuationPayload, WireParameters, parse_matrix_field};

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::{
    EnterpriseValue, SensitivityAxes, SensitivityResult, StatementLadder, Valuation,
    ValuationParameters, ValuationSource, generate_sensitivity_matrix, value_ladder,
};
use crate::error::{ExternalServiceError, ModelResult};

pub trait ValuationBackend {
    fn enterprise_value(
        &self,
        payload: &ValuationPayload,
    ) -> impl Future<Output = Result<f64, ExternalServiceError>> + Send;

    fn sensitivity_matrix(
        &self,
        payload: &ValuationPayload,
        rows: usize,
        cols: usize,
    ) -> impl Future<Output = Result<Vec<Vec<f64>>, ExternalServiceError>> + Send;
}

#[derive(Debug, Deserialize)]
struct EnterpriseValueResponse {
    #[serde(alias = "enterpriseValue", alias = "ev")]
    enterprise_value: f64,
}

#[derive(Debug, Deserialize)]
struct SensitivityResponse {
    matrix: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct RemoteValuationClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteValuationClient {
    pub fn new(base_url: &str, timeout: Duration) -> ModelResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ExternalServiceError::from)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn post(&self, path: &str, payload: &ValuationPayload) -> Result<Value, ExternalServiceError> {
        let request = async {
            let response = self
                .client
                .post(format!("{}/{path}", self.base_url))
                .json(payload)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ExternalServiceError::Status(response.status().as_u16()));
            }
            Ok::<Value, ExternalServiceError>(response.json::<Value>().await?)
        };
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ExternalServiceError::Timeout(self.timeout))?
    }
}

impl ValuationBackend for RemoteValuationClient {
    async fn enterprise_value(&self, payload: &ValuationPayload) -> Result<f64, ExternalServiceError> {
        let body = self.post("valuation", payload).await?;
        let response: EnterpriseValueResponse = serde_json::from_value(body)?;
        if !response.enterprise_value.is_finite() {
            return Err(ExternalServiceError::InvalidResponse(
                "enterprise value is not finite".to_string(),
            ));
        }
        Ok(response.enterprise_value)
    }

    async fn sensitivity_matrix(
        &self,
        payload: &ValuationPayload,
        rows: usize,
        cols: usize,
    ) -> Result<Vec<Vec<f64>>, ExternalServiceError> {
        let body = self.post("sensitivity", payload).await?;
        let response: SensitivityResponse = serde_json::from_value(body)?;
        parse_matrix_field(response.matrix.as_ref(), rows, cols)
    }
}

// Local errors propagate; remote errors fall back to the local result.
pub async fn value_with_fallback<B: ValuationBackend>(
    backend: &B,
    ladder: &StatementLadder,
    params: &ValuationParameters,
) -> ModelResult<Valuation> {
    let local = value_ladder(ladder, params)?;
    let payload = ValuationPayload::from_ladder(ladder, params);
    match backend.enterprise_value(&payload).await {
        Ok(value) => {
            info!(value, "using remote enterprise value");
            Ok(Valuation::derive(
                EnterpriseValue {
                    source: ValuationSource::Remote,
                    value,
                },
                params,
            ))
        }
        Err(e) => {
            warn!(error = %e, "remote valuation failed, using local estimate");
            Ok(local)
        }
    }
}

pub async fn sensitivity_with_fallback<B: ValuationBackend>(
    backend: &B,
    ladder: &StatementLadder,
    params: &ValuationParameters,
    axes: &SensitivityAxes,
) -> ModelResult<SensitivityResult> {
    let local = generate_sensitivity_matrix(ladder, params, axes)?;
    let payload = ValuationPayload::from_ladder(ladder, params);
    let rows = local.growth_axis.len();
    let cols = local.margin_axis.len();
    match backend.sensitivity_matrix(&payload, rows, cols).await {
        Ok(matrix) => Ok(SensitivityResult {
            source: ValuationSource::Remote,
            matrix: matrix
                .into_iter()
                .map(|row| row.into_iter().map(Some).collect())
                .collect(),
            ..local
        }),
        Err(e) => {
            warn!(error = %e, "remote sensitivity failed, using local grid");
            Ok(local)
        }
    }
}
