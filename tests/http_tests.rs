//! Control API integration tests

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{fast_audio_config, session_config, utterances, Harness, SAMPLE_RATE};
use loqa_voice::audio::{ScriptedMicrophone, Segment};
use loqa_voice::{create_router, AppState};
use std::time::Duration;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let harness = Harness::new();
    let mic = ScriptedMicrophone::from_segments(&[Segment::secs(0, 0.1)], SAMPLE_RATE);
    let (_engine, handle, _rx) = harness.build(mic, fast_audio_config(), session_config());

    let response = create_router(AppState::new(handle))
        .oneshot(get("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_of_a_fresh_session() {
    let harness = Harness::new();
    let mic = ScriptedMicrophone::from_segments(&[Segment::secs(0, 0.1)], SAMPLE_RATE);
    let (engine, handle, _rx) = harness.build(mic, fast_audio_config(), session_config());
    let engine = engine.with_session_id("http-test");
    drop(engine);

    let response = create_router(AppState::new(handle))
        .oneshot(get("/session/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["session_id"], "http-test");
    assert_eq!(json["state"], "idle");
    assert_eq!(json["stats"]["total_turns"], 0);
}

#[tokio::test]
async fn test_stop_over_http_ends_the_session() {
    let harness = Harness::new();
    let mic = ScriptedMicrophone::from_segments(&[Segment::secs(0, 0.1)], SAMPLE_RATE);
    let (task, handle, _rx) = harness.spawn(mic, fast_audio_config(), session_config());
    let app = create_router(AppState::new(handle.clone()));

    let response = app.clone().oneshot(post("/session/stop")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "stopping");
    assert!(handle.is_stopped());

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("engine ignored stop")
        .unwrap()
        .unwrap();

    let response = app.clone().oneshot(post("/session/stop")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.oneshot(post("/session/interrupt")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_interrupt_when_not_speaking() {
    let harness = Harness::new();
    let mic = ScriptedMicrophone::from_segments(&[Segment::secs(0, 0.1)], SAMPLE_RATE);
    let (_engine, handle, _rx) = harness.build(mic, fast_audio_config(), session_config());

    let response = create_router(AppState::new(handle))
        .oneshot(post("/session/interrupt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "not_speaking");
}

#[tokio::test]
async fn test_transcript_lists_completed_turns() {
    let harness = Harness::new();
    harness.recognizer.push(Ok("how are you".to_string()));
    harness.recognizer.push(Ok("bye".to_string()));
    harness.model.push(Ok("Great, thanks.".to_string()));

    let mic = ScriptedMicrophone::from_segments(&utterances(2), SAMPLE_RATE);
    let (engine, handle, _rx) = harness.build(mic, fast_audio_config(), session_config());
    tokio::time::timeout(Duration::from_secs(20), engine.run())
        .await
        .expect("session did not terminate")
        .unwrap();

    let app = create_router(AppState::new(handle));
    let response = app.clone().oneshot(get("/session/transcript")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let turns = json.as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["user_text"], "how are you");
    assert_eq!(turns[0]["reply_text"], "Great, thanks.");

    let status = body_json(app.oneshot(get("/session/status")).await.unwrap()).await;
    assert_eq!(status["state"], "terminated");
    assert_eq!(status["stats"]["successful_turns"], 1);
}
