use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use castpanel_api::{build_router, state::AppState};
use castpanel_captioning::config::CaptioningConfig;
use castpanel_captioning::pipeline::{CaptionPipeline, PipelineEngines};
use castpanel_captioning::testing::{
    MockLanguageDetector, MockSpeechEngine, MockTranslationEngine, SessionDriver,
    StaticWordListSource,
};
use castpanel_config::{ServerSettings, Settings};

/// Spawns the API on an ephemeral port with scripted engines behind it.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub speech: Arc<MockSpeechEngine>,
    pub translation: Arc<MockTranslationEngine>,
    pub detector: Arc<MockLanguageDetector>,
    sessions: mpsc::UnboundedReceiver<SessionDriver>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(CaptioningConfig {
            short_pause_ms: 0,
            interim_throttle_ms: 0,
            restart_delay_ms: 50,
            filter_enabled: false,
            ..CaptioningConfig::default()
        })
        .await
    }

    pub async fn spawn_with(captioning: CaptioningConfig) -> Self {
        init_tracing();

        let (speech, sessions) = MockSpeechEngine::new();
        let translation = MockTranslationEngine::new();
        let detector = MockLanguageDetector::new();
        let engines = PipelineEngines {
            speech: speech.clone(),
            translation: translation.clone(),
            detector: detector.clone(),
            word_lists: StaticWordListSource::new(),
        };

        let settings = Settings {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            captioning: captioning.clone(),
        };

        let (pipeline, _events) = CaptionPipeline::new(captioning, engines);
        let router = build_router(AppState::new(settings, pipeline));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let address = format!("http://{}", listener.local_addr().expect("listener addr"));
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("test server");
        });

        Self {
            address,
            client: reqwest::Client::new(),
            speech,
            translation,
            detector,
            sessions,
        }
    }

    pub async fn post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("request failed")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("request failed")
    }

    /// URL of the overlay caption feed.
    pub fn ws_url(&self) -> String {
        format!("{}/ws/captions", self.address.replacen("http", "ws", 1))
    }

    /// Next scripted recognition session handed out by the mock engine.
    pub async fn next_session(&mut self) -> SessionDriver {
        tokio::time::timeout(Duration::from_secs(5), self.sessions.recv())
            .await
            .expect("timed out waiting for a session start")
            .expect("speech engine dropped")
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
