use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State, multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    routing::{get, post},
};
use metrics::counter;
use std::sync::Arc;

use crate::engine::{ChatBackend, Classifier};
use crate::error::{ApiError, CLASSIFY_FAILED};
use crate::prompt::MEDICAL_DISCLAIMER;
use crate::provider::Provider;
use crate::types::{
    ChatRequest, ChatResponse, ClassifyResponse, HealthResponse, ServiceInfo,
};

const NOT_AN_IMAGE: &str = "Please upload an image file.";
const UNREADABLE_IMAGE: &str = "Could not read the uploaded image.";

#[derive(Clone)]
pub struct AppState {
    classifier: Arc<dyn Classifier>,
    chat: Arc<dyn ChatBackend>,
}

impl AppState {
    pub fn new(classifier: Arc<dyn Classifier>, chat: Arc<dyn ChatBackend>) -> Self {
        Self { classifier, chat }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/classify", post(classify_handler))
        .route("/chat", post(chat_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn root_handler() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "Cardiac MRI Classifier API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        health: "/health".to_string(),
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let info = state.classifier.info();
    Json(HealthResponse {
        status: "ok".to_string(),
        device: info.device,
        model_repo: info.model_repo,
        model_file: info.model_file,
        image_size: info.image_size,
    })
}

struct Upload {
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Takes the `file` field, or failing that the first field carrying a file name.
async fn read_upload(mut multipart: Multipart) -> Result<Option<Upload>, ApiError> {
    let mut fallback = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let is_file_field = field.name() == Some("file");
        if !is_file_field && (field.file_name().is_none() || fallback.is_some()) {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
            .to_vec();
        let upload = Upload {
            content_type,
            bytes,
        };
        if is_file_field {
            return Ok(Some(upload));
        }
        fallback = Some(upload);
    }
    Ok(fallback)
}

#[tracing::instrument(skip_all)]
async fn classify_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    counter!("classification_requests_total").increment(1);
    let multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let upload = read_upload(multipart)
        .await?
        .ok_or_else(|| ApiError::BadRequest(NOT_AN_IMAGE.to_string()))?;

    let is_image = upload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"));
    if !is_image {
        tracing::info!(content_type = ?upload.content_type, "Rejected non-image upload");
        return Err(ApiError::BadRequest(NOT_AN_IMAGE.to_string()));
    }

    let image = image::load_from_memory(&upload.bytes).map_err(|e| {
        tracing::info!(error = %e, bytes = upload.bytes.len(), "Undecodable upload");
        ApiError::BadRequest(UNREADABLE_IMAGE.to_string())
    })?;

    let prediction = state.classifier.predict(image).await.map_err(|e| {
        counter!("classification_failures_total").increment(1);
        tracing::error!(error = ?e, "Classification failed");
        ApiError::Upstream(CLASSIFY_FAILED)
    })?;

    Ok(Json(ClassifyResponse {
        prediction,
        disclaimer: MEDICAL_DISCLAIMER.to_string(),
    }))
}

#[tracing::instrument(skip_all)]
async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    counter!("chat_requests_total").increment(1);
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request.validate()?;

    let provider: Provider = request.provider.parse()?;
    tracing::info!(
        provider = %request.provider,
        history_len = request.history.len(),
        has_prediction = request.prediction.is_some(),
        "Processing chat request"
    );

    let reply = state
        .chat
        .chat(
            provider,
            &request.message,
            &request.history,
            request.prediction.as_ref(),
        )
        .await
        .map_err(|e| {
            counter!("chat_failures_total").increment(1);
            tracing::warn!(error = %e, "Chat request failed");
            ApiError::from(e)
        })?;

    Ok(Json(ChatResponse {
        reply: reply.reply,
        provider: request.provider,
        model: reply.model,
        disclaimer: MEDICAL_DISCLAIMER.to_string(),
    }))
}
