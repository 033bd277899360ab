use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json,
};
use parking_lot::RwLock;
use serde_json::json;
use std::{collections::BTreeMap, fs::File, sync::Arc};

use station_forecast::{data, types, BatchPredictor, ForecastConfig, PredictionOut, StationSnapshot};

// ---------- Server state ----------

#[derive(Default)]
struct Published {
    predictions: BTreeMap<i64, Vec<PredictionOut>>,
    snapshots: Vec<StationSnapshot>,
    failed: usize,
}

#[derive(Clone)]
struct AppState {
    cfg: Arc<ForecastConfig>,
    predictor: Option<Arc<BatchPredictor>>, // None when the model failed to load
    published: Arc<RwLock<Published>>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, msg: impl ToString) -> ApiError {
    (status, Json(json!({ "error": msg.to_string() })))
}

// ---------- Batch run ----------

/// Reload the station table and predict every station. Without a model the
/// prediction map is empty.
fn compute(cfg: &ForecastConfig, predictor: Option<&BatchPredictor>) -> anyhow::Result<Published> {
    let histories = data::load_histories(&cfg.data_path)?;
    let (predictions, failed) = match predictor {
        Some(p) => {
            let report = p.run(&histories);
            (report.predictions, report.failed.len())
        }
        None => (Default::default(), 0),
    };
    Ok(Published {
        predictions: types::to_wire(&predictions),
        snapshots: data::snapshots(&histories),
        failed,
    })
}

async fn compute_blocking(state: &AppState) -> anyhow::Result<Published> {
    let cfg = state.cfg.clone();
    let predictor = state.predictor.clone();
    tokio::task::spawn_blocking(move || compute(&cfg, predictor.as_deref()))
        .await
        .context("prediction task panicked")?
}

// ---------- Handlers ----------

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let published = state.published.read();
    Json(json!({
        "status": "ok",
        "model_loaded": state.predictor.is_some(),
        "stations": published.predictions.len(),
    }))
}

async fn all_predictions(State(state): State<AppState>) -> Json<BTreeMap<i64, Vec<PredictionOut>>> {
    Json(state.published.read().predictions.clone())
}

async fn station_predictions(
    State(state): State<AppState>,
    Path(station): Path<i64>,
) -> Result<Json<Vec<PredictionOut>>, ApiError> {
    state
        .published
        .read()
        .predictions
        .get(&station)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown station {}", station)))
}

async fn stations(State(state): State<AppState>) -> Json<Vec<StationSnapshot>> {
    Json(state.published.read().snapshots.clone())
}

async fn refresh(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let fresh = compute_blocking(&state)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;

    let body = json!({ "stations": fresh.predictions.len(), "failed": fresh.failed });
    *state.published.write() = fresh;
    Ok(Json(body))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = ForecastConfig::from_env()?;
    tracing::info!(
        model = %cfg.model_path.display(),
        data = %cfg.data_path.display(),
        prediction_hours = cfg.prediction_hours,
        seq_len = cfg.seq_len,
        "starting"
    );

    let predictor = match BatchPredictor::load(&cfg) {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            tracing::error!("error loading model: {}; serving empty predictions", e);
            None
        }
    };

    let state = AppState {
        cfg: Arc::new(cfg),
        predictor,
        published: Arc::new(RwLock::new(Published::default())),
    };

    match compute_blocking(&state).await {
        Ok(p) => *state.published.write() = p,
        Err(e) => tracing::error!("error loading data: {:#}", e),
    }

    if let Some(out) = &state.cfg.predictions_out {
        let file = File::create(out).with_context(|| format!("failed to create {}", out.display()))?;
        serde_json::to_writer_pretty(file, &state.published.read().predictions)?;
        tracing::info!("wrote predictions to {}", out.display());
        return Ok(());
    }

    let port = state.cfg.port;
    let app = axum::Router::new()
        .route("/health", get(health))
        .route("/predictions", get(all_predictions))
        .route("/predictions/:station", get(station_predictions))
        .route("/stations", get(stations))
        .route("/refresh", post(refresh))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
