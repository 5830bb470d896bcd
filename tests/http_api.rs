//! Cross-module HTTP API scenarios (spec §8): a real axum `Router` wired to
//! a real registry actor, driven through `tower::ServiceExt::oneshot`
//! without binding an actual socket.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use playdar::config::ConfigFile;
use playdar::model::{Candidate, Qid, Query, Ri, Sid};
use playdar::platform::Platform;
use playdar::registry;

fn test_platform() -> Platform {
    let registry = registry::spawn(Duration::from_secs(60));
    Platform::new(ConfigFile::default(), registry, vec![], None)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn sample_ri(sid: &str, score: f32) -> Ri {
    Ri {
        source: "test-node".to_string(),
        score,
        bitrate: 320,
        duration_ms: 210_000,
        size_bytes: 8_000_000,
        mimetype: "audio/mpeg".to_string(),
        artist: "Joy Division".to_string(),
        album: None,
        track: "Atmosphere".to_string(),
        sid: Sid(sid.to_string()),
        url: Some(format!("http://127.0.0.1:9/sid/{sid}")),
    }
}

#[tokio::test]
async fn resolve_then_get_results_round_trips_through_http() {
    let platform = test_platform();
    let app = playdar::http::router(platform.clone());

    let resolve_req = Request::builder()
        .method("POST")
        .uri("/api")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"artist": "Joy Division", "track": "Atmosphere"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(resolve_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let qid = body["qid"].as_str().expect("qid in response").to_string();

    // Dispatching the identical query a second time must return the same qid
    // and must not create a second live record (spec invariant 2).
    let second_req = Request::builder()
        .method("POST")
        .uri("/api")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"artist": "  joy division ", "track": "ATMOSPHERE"}).to_string(),
        ))
        .unwrap();
    let second = body_json(app.clone().oneshot(second_req).await.unwrap()).await;
    assert_eq!(second["qid"].as_str().unwrap(), qid);

    let results_req = Request::builder()
        .uri(format!("/api?method=get_results&qid={qid}"))
        .body(Body::empty())
        .unwrap();
    let results = body_json(app.oneshot(results_req).await.unwrap()).await;
    assert_eq!(results["results"].as_array().unwrap().len(), 0);
    assert_eq!(results["solved"], false);
    assert!(results["poll_interval"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn get_results_for_unknown_qid_is_404() {
    let platform = test_platform();
    let app = playdar::http::router(platform);

    let req = Request::builder()
        .uri(format!(
            "/api?method=get_results&qid={}",
            Qid(uuid::Uuid::new_v4())
        ))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn long_poll_wakes_up_as_soon_as_results_arrive() {
    let platform = test_platform();
    let app = playdar::http::router(platform.clone());

    let query = Query::new(Candidate {
        artist: "Joy Division".to_string(),
        album: None,
        track: "Atmosphere".to_string(),
    });
    let (qid, _) = platform.registry().register(query).await;

    let reporter_platform = platform.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        reporter_platform
            .registry()
            .report_results(
                qid,
                vec![sample_ri("s1", 0.2), sample_ri("s2", 0.3)],
                1.0,
            )
            .await;
    });

    let started = tokio::time::Instant::now();
    let req = Request::builder()
        .uri(format!("/api?method=get_results_long&qid={qid}&lastpoll=0"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000));

    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["sid"], "s1");
    assert_eq!(results[1]["sid"], "s2");
}

#[tokio::test]
async fn streaming_an_unknown_sid_is_404() {
    let platform = test_platform();
    let app = playdar::http::router(platform);

    let req = Request::builder()
        .uri("/sid/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn roster_is_empty_json_array_without_a_lan_resolver() {
    let platform = test_platform();
    let app = playdar::http::router(platform);

    let req = Request::builder()
        .uri("/lan/roster")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}
