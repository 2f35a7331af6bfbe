use axum::{Json, extract::State};
use serde::Serialize;

use castpanel_captioning::pipeline::PipelineStatus;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct CaptioningStatusResponse {
    #[serde(flatten)]
    pub status: PipelineStatus,
    pub running: bool,
    pub speech_language: String,
}

fn status_of(state: &AppState) -> CaptioningStatusResponse {
    CaptioningStatusResponse {
        status: state.pipeline.current_status(),
        running: state.pipeline.is_running(),
        speech_language: state.settings.captioning.speech_language.clone(),
    }
}

pub async fn start(
    State(state): State<AppState>,
) -> Result<Json<CaptioningStatusResponse>, ApiError> {
    state.pipeline.start().await?;
    Ok(Json(status_of(&state)))
}

pub async fn stop(
    State(state): State<AppState>,
) -> Result<Json<CaptioningStatusResponse>, ApiError> {
    state.pipeline.stop().await?;
    Ok(Json(status_of(&state)))
}

pub async fn status(State(state): State<AppState>) -> Json<CaptioningStatusResponse> {
    Json(status_of(&state))
}
