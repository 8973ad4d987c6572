use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stock_ledger::{
    ItemId, Location, LocationId, LocationLevel, NewTransaction, ReconcileOutcome, ReconciliationEngine, StockError,
    StockKey, StockQueryService, Transaction, TransactionId, TransactionLog,
};

#[derive(Clone)]
pub struct AppState {
    pub log: Arc<dyn TransactionLog>,
    pub engine: ReconciliationEngine,
    pub query: StockQueryService,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Serialize)]
pub struct AppendResponse {
    pub id: TransactionId,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub outcome: &'static str,
    pub level: LocationLevel,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocationsQuery {
    /// Comma separated location ids. All active locations when absent.
    pub locations: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub item_id: ItemId,
    pub locations: Vec<LocationId>,
    pub quantity: i64,
    pub in_stock: bool,
    pub always_in_stock: bool,
    pub managed: bool,
}

#[derive(Debug, Serialize)]
pub struct LocationStock {
    pub location_id: LocationId,
    pub cached_quantity: i64,
    pub last_checkpoint_id: TransactionId,
    pub unreconciled_delta: i64,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct BreakdownResponse {
    pub item_id: ItemId,
    pub locations: Vec<LocationStock>,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    #[serde(default = "default_active_only")]
    pub active_only: bool,
}

fn default_active_only() -> bool {
    true
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/transactions", post(append_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/levels/:location_id/:item_id/reconcile", post(reconcile_level))
        .route("/items/:item_id/stock", get(get_stock))
        .route("/items/:item_id/breakdown", get(get_breakdown))
        .route("/locations", get(list_locations))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn error_response(error: StockError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        StockError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        StockError::QuantityOverflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StockError::StoreUnavailable(_) => {
            tracing::error!("Stock store failure: {}", error);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, Json(ErrorResponse { error: error.to_string() }))
}

fn parse_locations(raw: &str) -> Result<Vec<LocationId>, StockError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map(LocationId)
                .map_err(|_| StockError::invalid(format!("invalid location id {:?}", part)))
        })
        .collect()
}

async fn resolve_locations(state: &AppState, query: &LocationsQuery) -> Result<Vec<LocationId>, StockError> {
    match &query.locations {
        Some(raw) => parse_locations(raw),
        None => state.query.active_location_ids().await,
    }
}

pub async fn append_transaction(
    State(state): State<AppState>,
    Json(request): Json<NewTransaction>,
) -> ApiResult<AppendResponse> {
    let id = state.log.append(request).await.map_err(error_response)?;
    tracing::info!("Appended stock transaction {}", id);
    Ok(Json(AppendResponse { id }))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, (StatusCode, Json<ErrorResponse>)> {
    match state.log.get(TransactionId(id)).await.map_err(error_response)? {
        Some(transaction) => Ok(Json(transaction)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { error: format!("transaction {} not found", id) }),
        )),
    }
}

pub async fn reconcile_level(
    State(state): State<AppState>,
    Path((location_id, item_id)): Path<(i64, i64)>,
) -> ApiResult<ReconcileResponse> {
    let key = StockKey::new(LocationId(location_id), ItemId(item_id)).map_err(error_response)?;
    let outcome = state.engine.reconcile(key).await.map_err(error_response)?;
    let label = match outcome {
        ReconcileOutcome::Advanced(_) => "advanced",
        ReconcileOutcome::UpToDate(_) => "up_to_date",
        ReconcileOutcome::Conflict(_) => "conflict",
    };
    Ok(Json(ReconcileResponse { outcome: label, level: outcome.level() }))
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Query(query): Query<LocationsQuery>,
) -> ApiResult<StockResponse> {
    let item_id = ItemId(item_id);
    let locations = resolve_locations(&state, &query).await.map_err(error_response)?;
    let quantity = state.query.get_stock_level(item_id, &locations).await.map_err(error_response)?;
    let always_in_stock = state.query.is_always_in_stock(item_id).await.map_err(error_response)?;
    let managed = state.query.is_stock_managed(item_id).await.map_err(error_response)?;

    Ok(Json(StockResponse {
        item_id,
        locations,
        quantity,
        in_stock: quantity > 0,
        always_in_stock,
        managed,
    }))
}

pub async fn get_breakdown(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Query(query): Query<LocationsQuery>,
) -> ApiResult<BreakdownResponse> {
    let item_id = ItemId(item_id);
    let locations = resolve_locations(&state, &query).await.map_err(error_response)?;
    let breakdown = state
        .query
        .get_location_breakdown(item_id, &locations)
        .await
        .map_err(error_response)?;

    let locations = breakdown
        .into_iter()
        .map(|(location_id, entry)| {
            let quantity = entry.quantity(StockKey { location_id, item_id })?;
            Ok(LocationStock {
                location_id,
                cached_quantity: entry.cached_quantity,
                last_checkpoint_id: entry.last_checkpoint_id,
                unreconciled_delta: entry.unreconciled_delta,
                quantity,
            })
        })
        .collect::<Result<Vec<_>, StockError>>()
        .map_err(error_response)?;
    Ok(Json(BreakdownResponse { item_id, locations }))
}

pub async fn list_locations(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<Vec<Location>> {
    let locations = state.query.list_locations(query.active_only).await.map_err(error_response)?;
    Ok(Json(locations))
}

pub async fn health_check() -> &'static str {
    "OK"
}
