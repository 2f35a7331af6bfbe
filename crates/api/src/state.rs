use std::sync::Arc;

use castpanel_captioning::CaptionPipeline;
use castpanel_config::Settings;

/// Shared state for the operator/overlay API.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pipeline: Arc<CaptionPipeline>,
}

impl AppState {
    pub fn new(settings: Settings, pipeline: Arc<CaptionPipeline>) -> Self {
        Self {
            settings: Arc::new(settings),
            pipeline,
        }
    }
}
