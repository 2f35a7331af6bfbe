use crate::fixtures::test_app::TestApp;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;

use castpanel_captioning::config::CaptioningConfig;
use castpanel_captioning::error::PermissionError;
use castpanel_captioning::{TranslationConfig, TranslationRequest};

#[tokio::test]
async fn health_check_reports_ok() {
    let app = TestApp::spawn().await;
    let resp = app.get("/health").await;
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn start_status_stop_roundtrip() {
    let mut app = TestApp::spawn().await;

    let resp = app.get("/api/captioning/status").await;
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["state"], "idle");
    assert_eq!(json["running"], false);

    let resp = app.post("/api/captioning/start").await;
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["state"], "running");
    assert_eq!(json["running"], true);
    assert_eq!(json["speech_language"], "en-US");
    let _session = app.next_session().await;

    // Starting twice is a conflict.
    let resp = app.post("/api/captioning/start").await;
    assert_eq!(resp.status().as_u16(), 409);

    let resp = app.post("/api/captioning/stop").await;
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["state"], "idle");

    // Stopping again is a conflict too.
    let resp = app.post("/api/captioning/stop").await;
    assert_eq!(resp.status().as_u16(), 409);
}

#[tokio::test]
async fn denied_microphone_surfaces_as_server_error() {
    let app = TestApp::spawn().await;
    app.speech.fail_next_start(PermissionError::Denied);

    let resp = app.post("/api/captioning/start").await;
    assert_eq!(resp.status().as_u16(), 500);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"], "internal");
    assert_eq!(json["message"], "microphone access denied");

    let resp = app.get("/api/captioning/status").await;
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["state"], "failed");
}

#[tokio::test]
async fn invalid_translation_config_is_rejected() {
    let mut config = CaptioningConfig::default();
    config.translation = TranslationConfig {
        enabled: true,
        targets: vec![
            TranslationRequest {
                target_language: "en".to_string(),
                output_slot_index: 0,
            },
            TranslationRequest {
                target_language: "fr".to_string(),
                output_slot_index: 1,
            },
            TranslationRequest {
                target_language: "de".to_string(),
                output_slot_index: 2,
            },
            TranslationRequest {
                target_language: "es".to_string(),
                output_slot_index: 0,
            },
        ],
        ..TranslationConfig::default()
    };
    let app = TestApp::spawn_with(config).await;

    let resp = app.post("/api/captioning/start").await;
    assert_eq!(resp.status().as_u16(), 400);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"], "bad_request");
}

#[tokio::test]
async fn ws_feed_delivers_captions_and_translations() {
    let mut config = CaptioningConfig {
        short_pause_ms: 0,
        interim_throttle_ms: 0,
        filter_enabled: false,
        ..CaptioningConfig::default()
    };
    config.translation = TranslationConfig {
        enabled: true,
        targets: vec![TranslationRequest {
            target_language: "fr".to_string(),
            output_slot_index: 0,
        }],
        min_call_interval_ms: 0,
        ..TranslationConfig::default()
    };
    let mut app = TestApp::spawn_with(config).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(app.ws_url())
        .await
        .expect("ws connect");

    let greeting: Value = next_json(&mut ws).await;
    assert_eq!(greeting["type"], "connected");

    let resp = app.post("/api/captioning/start").await;
    assert_eq!(resp.status().as_u16(), 200);
    let session = app.next_session().await;

    session.interim("good eve").await;
    let interim: Value = next_json(&mut ws).await;
    assert_eq!(interim["type"], "caption");
    assert_eq!(interim["is_interim"], true);
    assert_eq!(interim["text"], "good eve");

    session.finalize("good evening").await;
    let caption: Value = next_json(&mut ws).await;
    assert_eq!(caption["type"], "caption");
    assert_eq!(caption["is_interim"], false);
    assert_eq!(caption["expected_translations"], 1);

    let translation: Value = next_json(&mut ws).await;
    assert_eq!(translation["type"], "caption_translation");
    assert_eq!(translation["id"], caption["id"]);
    assert_eq!(translation["target_language"], "fr");
    assert_eq!(translation["output_slot_index"], 0);

    ws.close(None).await.ok();
    app.post("/api/captioning/stop").await;
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures::Stream<
            Item = Result<tokio_tungstenite::tungstenite::Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for ws message")
            .expect("ws closed")
            .expect("ws error");
        if message.is_text() {
            return serde_json::from_str(&message.into_text().expect("text frame"))
                .expect("valid json");
        }
    }
}
