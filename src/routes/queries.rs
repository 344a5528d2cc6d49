use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::info;
use uuid::Uuid;

use crate::models::{AppState, Job, QueryRequest, SubmitResponse};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/queries", post(submit_question))
        .route("/api/queries/diagnose", post(submit_photo))
        .route("/api/queries/{id}", get(get_query))
        .route("/api/users/{user_id}/queries", get(list_user_queries))
        .with_state(state)
}

async fn submit_question(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    info!(question_len = request.question.len(), room = ?request.room_id, "Question received");

    let job = state
        .queue
        .submit_question(&request.question, request.user_id, request.room_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// Multipart fields: `image` (required), `question`, `user_id`, `room_id`.
async fn submit_photo(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let mut image = None;
    let mut content_type = None;
    let mut question = None;
    let mut user_id = None;
    let mut room_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                content_type = field.content_type().map(String::from);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidRequest(format!("unreadable image: {e}")))?;
                image = Some(bytes.to_vec());
            }
            "question" | "user_id" | "room_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidRequest(format!("unreadable field {name}: {e}")))?;
                match name.as_str() {
                    "question" => question = Some(value),
                    "user_id" => user_id = Some(value),
                    _ => room_id = Some(value),
                }
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| AppError::InvalidRequest("missing image field".to_string()))?;
    let job = state
        .queue
        .submit_photo(image, content_type, question, user_id, room_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

async fn get_query(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Job>> {
    Ok(Json(state.queue.get_job(id).await?))
}

async fn list_user_queries(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<Job>>> {
    Ok(Json(state.queue.list_for_user(&user_id).await?))
}
