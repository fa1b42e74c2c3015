use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use shoprec::services::dataset;
use shoprec::{
    init_tracing, AppState, Config, ModelInfo, RecommendationRequest, RecommendationResponse, RecommenderError,
    TrainingOptions, TrainingStatus,
};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const MAX_BATCH_REQUESTS: usize = 100;

#[derive(Parser, Debug)]
#[command(author, version, about = "Shop recommendation server", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Overrides `server.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    top_k: Option<usize>,
    exclude_purchased: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    user: String,
    top_k: Option<usize>,
    exclude_purchased: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BatchRecommendationRequest {
    requests: Vec<BatchItem>,
}

#[derive(Debug, Default, Deserialize)]
struct TrainRequest {
    epochs: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn api_error(status: StatusCode, message: String) -> ApiError {
    (status, Json(ApiResponse::error(message)))
}

fn status_for(err: &RecommenderError) -> StatusCode {
    match err {
        RecommenderError::Validation(_) | RecommenderError::EmptyDataset => StatusCode::BAD_REQUEST,
        RecommenderError::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RecommenderError> for ApiResponse<()> {
    fn from(err: RecommenderError) -> Self {
        ApiResponse::error(err.to_string())
    }
}

fn request_from(state: &AppState, user: String, top_k: Option<usize>, exclude: Option<bool>) -> RecommendationRequest {
    let defaults = &state.config.recommendation;
    RecommendationRequest {
        user,
        top_k: top_k.unwrap_or(defaults.default_top_k),
        exclude_purchased: exclude.unwrap_or(defaults.exclude_purchased),
    }
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "shoprec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    status.insert(
        "model_ready".to_string(),
        state.recommendation_service.is_ready().to_string(),
    );
    status.insert(
        "training".to_string(),
        state.training_service.is_running().to_string(),
    );

    Json(ApiResponse::success(status))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<RecommendationResponse> {
    let request = request_from(&state, user_id, params.top_k, params.exclude_purchased);

    match state.serving_service.serve_recommendations(&request).await {
        Ok(response) => Ok(Json(ApiResponse::success(response))),
        Err(e) => {
            error!("Failed to get recommendations for {}: {}", request.user, e);
            let status = status_for(&e);
            Err((status, Json(e.into())))
        }
    }
}

async fn batch_recommendations(
    State(state): State<AppState>,
    Json(body): Json<BatchRecommendationRequest>,
) -> ApiResult<Vec<RecommendationResponse>> {
    if body.requests.len() > MAX_BATCH_REQUESTS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Too many requests in batch (max {})", MAX_BATCH_REQUESTS),
        ));
    }

    let requests: Vec<RecommendationRequest> = body
        .requests
        .into_iter()
        .map(|item| request_from(&state, item.user, item.top_k, item.exclude_purchased))
        .collect();

    let responses = state.serving_service.batch_serve_recommendations(&requests).await;
    Ok(Json(ApiResponse::success(responses)))
}

async fn start_training(
    State(state): State<AppState>,
    body: Option<Json<TrainRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<String>>), ApiError> {
    let Some(slot) = state.training_service.try_reserve() else {
        return Err(api_error(
            StatusCode::CONFLICT,
            "A training run is already in progress".to_string(),
        ));
    };

    let source = dataset::from_config(&state.config.dataset)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let options = TrainingOptions {
        epochs: body.map(|Json(request)| request).unwrap_or_default().epochs,
    };

    let training = state.training_service.clone();
    tokio::spawn(async move {
        if let Err(e) = training
            .train_from_source_reserved(slot, source.as_ref(), options)
            .await
        {
            error!("Background training failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success("Training started".to_string())),
    ))
}

async fn training_status(State(state): State<AppState>) -> Json<ApiResponse<TrainingStatus>> {
    Json(ApiResponse::success(state.training_service.status()))
}

async fn model_info(State(state): State<AppState>) -> Json<ApiResponse<ModelInfo>> {
    Json(ApiResponse::success(state.recommendation_service.model_info()))
}

async fn serving_stats(State(state): State<AppState>) -> Json<ApiResponse<HashMap<String, u64>>> {
    Json(ApiResponse::success(state.serving_service.get_serving_stats()))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommendations/batch", post(batch_recommendations))
        .route("/recommendations/:user_id", get(get_recommendations))
        .route("/train", post(start_training))
        .route("/train/status", get(training_status))
        .route("/model", get(model_info))
        .route("/stats", get(serving_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.server.socket_addr()?;
    let state = AppState::new(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let mut config = Config::load_or_default(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    info!("Starting shoprec server with config: {:?}", config.server);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()?
        .block_on(serve(config))
}
