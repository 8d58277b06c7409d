use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Router,
    extract::{Json, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::{
    AssumptionSet, LineItem, ModelInput, ModellingSession, Row, Scenario, ScenarioStore,
    SensitivityResult, SessionState, Valuation, ValuationSource, Year, decode_shareable,
    encode_shareable, share_link,
};
use crate::error::{ModelError, ModelResult};
use crate::remote::{RemoteValuationClient, sensitivity_with_fallback, value_with_fallback};

#[derive(Clone)]
pub struct AppState {
    config: Arc<EngineConfig>,
    remote: Option<RemoteValuationClient>,
    store: Arc<Mutex<ScenarioStore>>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> ModelResult<Self> {
        config.validate()?;
        let remote = match &config.remote_url {
            Some(url) => Some(RemoteValuationClient::new(url, config.remote_timeout)?),
            None => None,
        };
        let store = match &config.scenario_path {
            Some(path) => ScenarioStore::open(path)?,
            None => ScenarioStore::new(),
        };
        Ok(Self {
            config: Arc::new(config),
            remote,
            store: Arc::new(Mutex::new(store)),
        })
    }

    fn store(&self) -> ModelResult<MutexGuard<'_, ScenarioStore>> {
        self.store
            .lock()
            .map_err(|_| ModelError::Storage("scenario store lock poisoned".to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DriverEdit {
    metric: String,
    year: Year,
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelRequest {
    symbol: String,
    #[serde(flatten)]
    input: ModelInput,
    #[serde(default)]
    scenario: Option<String>,
    #[serde(default)]
    saved_scenario: Option<usize>,
    #[serde(default)]
    assumptions: Option<AssumptionSet>,
    #[serde(default)]
    edits: Vec<DriverEdit>,
    #[serde(default)]
    enterprise_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedScenarioRequest {
    #[serde(flatten)]
    model: ModelRequest,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRequest {
    symbol: String,
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelResponse {
    symbol: String,
    state: SessionState,
    years: Vec<Year>,
    forecast_start: usize,
    rows: BTreeMap<LineItem, Row>,
    valuation: Option<Valuation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    valuation_error: Option<String>,
    sensitivity: Option<SensitivityResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sensitivity_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShareResponse {
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<String>,
}

#[derive(Debug, Serialize)]
struct SavedResponse {
    index: usize,
    scenario: Scenario,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    remote: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/model", post(model_handler))
        .route("/api/scenarios/share", post(share_handler))
        .route("/api/scenarios/open", post(open_handler))
        .route("/api/scenarios/save", post(save_handler))
        .route("/api/scenarios/:symbol", get(list_handler))
        .route("/api/scenarios/:symbol/:index", delete(delete_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let remote = state.remote.is_some();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, remote, "valuation HTTP API listening");
    println!("Valuation HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            remote: state.remote.is_some(),
        },
    )
}

async fn model_handler(
    State(state): State<AppState>,
    payload: Result<Json<ModelRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match model_response(&state, request).await {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => model_error_response(&e),
    }
}

async fn share_handler(
    State(state): State<AppState>,
    payload: Result<Json<NamedScenarioRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match share_response(&state, request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => model_error_response(&e),
    }
}

async fn open_handler(payload: Result<Json<OpenRequest>, JsonRejection>) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match decode_shareable(&request.token, &request.symbol) {
        Ok(scenario) => json_response(StatusCode::OK, scenario),
        Err(e) => model_error_response(&e),
    }
}

async fn save_handler(
    State(state): State<AppState>,
    payload: Result<Json<NamedScenarioRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match save_response(&state, request) {
        Ok(response) => json_response(StatusCode::CREATED, response),
        Err(e) => model_error_response(&e),
    }
}

async fn list_handler(State(state): State<AppState>, Path(symbol): Path<String>) -> Response {
    match state.store() {
        Ok(store) => json_response(StatusCode::OK, store.list(&symbol)),
        Err(e) => model_error_response(&e),
    }
}

async fn delete_handler(
    State(state): State<AppState>,
    Path((symbol, index)): Path<(String, usize)>,
) -> Response {
    let removed = state.store().and_then(|mut store| store.delete(&symbol, index));
    match removed {
        Ok(scenario) => json_response(StatusCode::OK, scenario),
        Err(e) => model_error_response(&e),
    }
}

fn prepare_session(state: &AppState, request: &ModelRequest) -> ModelResult<ModellingSession> {
    let (ladder, parameters) = request.input.build(state.config.forecast_years)?;
    let mut session = ModellingSession::new(&request.symbol, ladder, parameters)?;

    if let Some(token) = &request.scenario {
        session.open_shared(token)?;
    }
    if let Some(index) = request.saved_scenario {
        let store = state.store()?;
        session.load(&store, index)?;
    }
    if let Some(assumptions) = &request.assumptions {
        session.apply_external_scenario(assumptions)?;
    }
    for edit in &request.edits {
        let item = LineItem::from_key(&edit.metric).ok_or_else(|| {
            ModelError::validation(format!("unknown metric {}", edit.metric))
        })?;
        session.edit_driver(item, edit.year, &raw_cell(&edit.value))?;
    }
    if let Some(value) = request.enterprise_value {
        session.accept_remote_enterprise_value(value)?;
    }
    Ok(session)
}

fn raw_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

async fn model_response(state: &AppState, request: ModelRequest) -> ModelResult<ModelResponse> {
    let mut session = prepare_session(state, &request)?;
    let axes = &state.config.sensitivity;

    let sensitivity = match &state.remote {
        Some(remote) => {
            if request.enterprise_value.is_none() && session.valuation().is_some() {
                let valuation =
                    value_with_fallback(remote, session.ladder(), session.parameters()).await?;
                if valuation.enterprise_value.source == ValuationSource::Remote {
                    session.accept_remote_enterprise_value(valuation.enterprise_value.value)?;
                }
            }
            sensitivity_with_fallback(remote, session.ladder(), session.parameters(), axes).await
        }
        None => session.sensitivity(axes),
    };
    let (sensitivity, sensitivity_error) = match sensitivity {
        Ok(result) => (Some(result), None),
        Err(e) => {
            warn!(symbol = %session.symbol(), error = %e, "sensitivity grid unavailable");
            (None, Some(e.to_string()))
        }
    };

    let snapshot = session.ladder().snapshot();
    Ok(ModelResponse {
        symbol: session.symbol().to_string(),
        state: session.state().clone(),
        years: snapshot.years,
        forecast_start: snapshot.forecast_start,
        rows: snapshot.rows,
        valuation: session.valuation().cloned(),
        valuation_error: session.valuation_error().map(str::to_string),
        sensitivity,
        sensitivity_error,
    })
}

fn share_response(state: &AppState, request: NamedScenarioRequest) -> ModelResult<ShareResponse> {
    let session = prepare_session(state, &request.model)?;
    let scenario = Scenario::new(
        &request.name,
        request.description.as_deref(),
        &session.ladder().snapshot(),
        session.parameters(),
    )?;
    let token = encode_shareable(session.symbol(), &scenario)?;
    let link = request
        .base_url
        .as_deref()
        .map(|base_url| share_link(base_url, session.symbol(), &scenario))
        .transpose()?;
    Ok(ShareResponse { token, link })
}

fn save_response(state: &AppState, request: NamedScenarioRequest) -> ModelResult<SavedResponse> {
    let mut session = prepare_session(state, &request.model)?;
    let mut store = state.store()?;
    session.save(&mut store, &request.name, request.description.as_deref())?;
    let list = store.list(session.symbol());
    let index = list.len().saturating_sub(1);
    let scenario = store.get(session.symbol(), index)?.clone();
    Ok(SavedResponse { index, scenario })
}

fn status_for(err: &ModelError) -> StatusCode {
    match err {
        ModelError::Validation(_) => StatusCode::BAD_REQUEST,
        ModelError::Valuation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ModelError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        ModelError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn model_error_response(err: &ModelError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    error_response(status, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn model_request_from_json(json: &str) -> Result<ModelRequest, String> {
    serde_json::from_str::<ModelRequest>(json).map_err(|e| format!("Invalid API JSON payload: {e}"))
}
