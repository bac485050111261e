use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use alert_sync_api::{
    run_live, AlertBackend, AlertBoard, BoardConfig, InMemoryBackend, Notice, SeedDocument,
    API_CONTRACT_VERSION,
};
use alert_sync_core::{
    Agent, AgentId, Alert, AlertFilters, AlertId, AlertStatistics, AlertStatus, BoardSnapshot,
    ContactMethod, OutcomeRecord, SortKey, DEFAULT_PAGE_SIZE,
};
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use ulid::Ulid;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    board: AlertBoard<InMemoryBackend>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    filters: AlertFilters,
    #[serde(default)]
    sort: SortKey,
}

#[derive(Debug, Clone, Deserialize)]
struct ToggleRequest {
    id: AlertId,
}

#[derive(Debug, Clone, Serialize)]
struct SelectionResponse {
    selected: Vec<AlertId>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContactRequest {
    method: ContactMethod,
}

#[derive(Debug, Clone, Deserialize)]
struct AssignRequest {
    agent_id: AgentId,
}

#[derive(Debug, Clone, Deserialize)]
struct OutcomeRequest {
    outcome: OutcomeRecord,
}

#[derive(Debug, Clone, Deserialize)]
struct BulkStatusRequest {
    #[serde(default)]
    ids: Option<Vec<AlertId>>,
    status: AlertStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct BulkDismissRequest {
    #[serde(default)]
    ids: Option<Vec<AlertId>>,
}

#[derive(Debug, Clone, Deserialize)]
struct PublishRequest {
    alert: Alert,
}

#[derive(Debug, Clone, Serialize)]
struct PublishResponse {
    alert_id: AlertId,
}

#[derive(Debug, Parser)]
#[command(name = "alert-sync-service")]
#[command(about = "Local HTTP service for the alert sync board")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, default_value = "local-agent")]
    user: String,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,
    #[arg(long, default_value = "date_new", value_parser = parse_sort_key)]
    sort: SortKey,
    /// YAML document with `alerts` and `agents`; a demo portfolio when absent.
    #[arg(long)]
    seed: Option<PathBuf>,
    /// Tracing filter directive; falls back to `RUST_LOG`, then `info`.
    #[arg(long)]
    log: Option<String>,
}

fn parse_sort_key(value: &str) -> Result<SortKey, String> {
    SortKey::parse(value).ok_or_else(|| format!("unknown sort key: {value}"))
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type ServiceResult<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn notice_response(notice: Notice) -> ServiceResult<Notice> {
    if notice.is_success() {
        Ok(Json(envelope(notice)))
    } else {
        Err(ServiceState::error(notice.message))
    }
}

fn parse_alert_id(raw: &str) -> Result<AlertId, ServiceError> {
    Ulid::from_string(raw)
        .map(AlertId)
        .map_err(|err| ServiceState::error(format!("invalid alert id {raw}: {err}")))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/board", get(board_show))
        .route("/v1/board/query", post(board_query))
        .route("/v1/board/reload", post(board_reload))
        .route("/v1/board/load-more", post(board_load_more))
        .route("/v1/selection/toggle", post(selection_toggle))
        .route("/v1/selection/select-all", post(selection_select_all))
        .route("/v1/selection/clear", post(selection_clear))
        .route("/v1/alerts/bulk/status", post(alerts_bulk_status))
        .route("/v1/alerts/bulk/dismiss", post(alerts_bulk_dismiss))
        .route("/v1/alerts/:alert_id/acknowledge", post(alert_acknowledge))
        .route("/v1/alerts/:alert_id/contact", post(alert_contact))
        .route("/v1/alerts/:alert_id/dismiss", post(alert_dismiss))
        .route("/v1/alerts/:alert_id/assign", post(alert_assign))
        .route("/v1/alerts/:alert_id/outcome", post(alert_outcome))
        .route("/v1/statistics", get(statistics))
        .route("/v1/agents", get(agents))
        .route("/v1/live/publish", post(live_publish))
        .with_state(state)
}

fn init_logging(directive: Option<&str>) -> Result<()> {
    let filter = match directive {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter: {directive}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn load_seed(path: Option<&std::path::Path>) -> Result<SeedDocument> {
    let Some(path) = path else {
        return Ok(SeedDocument::fixture(OffsetDateTime::now_utc()));
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("invalid seed file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_deref())?;

    let seed = load_seed(args.seed.as_deref())?;
    let backend = Arc::new(InMemoryBackend::new(seed)?);
    let config = BoardConfig {
        user_id: args.user,
        page_size: args.page_size,
        default_sort: args.sort,
        default_filters: AlertFilters::default(),
    };
    let board = AlertBoard::new(Arc::clone(&backend), config);
    tokio::spawn(run_live(board.clone(), backend.subscribe()));

    let notice = board.reload().await;
    tracing::info!(message = %notice.message, "initial load");

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "alert sync service listening");
    axum::serve(listener, app(ServiceState { board })).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn board_show(State(state): State<ServiceState>) -> Json<ServiceEnvelope<BoardSnapshot>> {
    Json(envelope(state.board.snapshot()))
}

async fn board_query(
    State(state): State<ServiceState>,
    Json(request): Json<QueryRequest>,
) -> ServiceResult<Notice> {
    notice_response(state.board.change_query(request.filters, request.sort).await)
}

async fn board_reload(State(state): State<ServiceState>) -> ServiceResult<Notice> {
    notice_response(state.board.reload().await)
}

async fn board_load_more(State(state): State<ServiceState>) -> ServiceResult<Notice> {
    notice_response(state.board.load_more().await)
}

async fn selection_toggle(
    State(state): State<ServiceState>,
    Json(request): Json<ToggleRequest>,
) -> Json<ServiceEnvelope<SelectionResponse>> {
    state.board.toggle_selected(request.id);
    Json(envelope(SelectionResponse { selected: state.board.snapshot().selected }))
}

async fn selection_select_all(
    State(state): State<ServiceState>,
) -> Json<ServiceEnvelope<SelectionResponse>> {
    state.board.select_all();
    Json(envelope(SelectionResponse { selected: state.board.snapshot().selected }))
}

async fn selection_clear(
    State(state): State<ServiceState>,
) -> Json<ServiceEnvelope<SelectionResponse>> {
    state.board.clear_selection();
    Json(envelope(SelectionResponse { selected: Vec::new() }))
}

async fn alert_acknowledge(
    State(state): State<ServiceState>,
    Path(alert_id): Path<String>,
) -> ServiceResult<Notice> {
    let id = parse_alert_id(&alert_id)?;
    notice_response(state.board.acknowledge(id).await)
}

async fn alert_contact(
    State(state): State<ServiceState>,
    Path(alert_id): Path<String>,
    Json(request): Json<ContactRequest>,
) -> ServiceResult<Notice> {
    let id = parse_alert_id(&alert_id)?;
    notice_response(state.board.mark_contacted(id, request.method).await)
}

async fn alert_dismiss(
    State(state): State<ServiceState>,
    Path(alert_id): Path<String>,
) -> ServiceResult<Notice> {
    let id = parse_alert_id(&alert_id)?;
    notice_response(state.board.dismiss(id).await)
}

async fn alert_assign(
    State(state): State<ServiceState>,
    Path(alert_id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> ServiceResult<Notice> {
    let id = parse_alert_id(&alert_id)?;
    notice_response(state.board.assign(id, request.agent_id).await)
}

async fn alert_outcome(
    State(state): State<ServiceState>,
    Path(alert_id): Path<String>,
    Json(request): Json<OutcomeRequest>,
) -> ServiceResult<Notice> {
    let id = parse_alert_id(&alert_id)?;
    notice_response(state.board.record_outcome(id, request.outcome).await)
}

async fn alerts_bulk_status(
    State(state): State<ServiceState>,
    Json(request): Json<BulkStatusRequest>,
) -> ServiceResult<Notice> {
    notice_response(state.board.bulk_update_status(request.ids, request.status).await)
}

async fn alerts_bulk_dismiss(
    State(state): State<ServiceState>,
    Json(request): Json<BulkDismissRequest>,
) -> ServiceResult<Notice> {
    notice_response(state.board.bulk_dismiss(request.ids).await)
}

async fn statistics(State(state): State<ServiceState>) -> ServiceResult<AlertStatistics> {
    let stats =
        state.board.statistics().await.map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(stats)))
}

async fn agents(State(state): State<ServiceState>) -> ServiceResult<Vec<Agent>> {
    let agents =
        state.board.agents().await.map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(agents)))
}

async fn live_publish(
    State(state): State<ServiceState>,
    Json(request): Json<PublishRequest>,
) -> ServiceResult<PublishResponse> {
    let alert_id = state
        .board
        .backend()
        .publish(request.alert)
        .map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(PublishResponse { alert_id })))
}
