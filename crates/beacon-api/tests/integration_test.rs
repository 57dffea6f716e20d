// Integration tests for the Beacon API
// Run with: cargo test --test integration_test -- --ignored
//
// Requirements: a running beacon-api server (and its database) at
// BEACON_API_URL or http://localhost:9000.

use serde_json::{json, Value};

fn api_base_url() -> String {
    std::env::var("BEACON_API_URL").unwrap_or_else(|_| "http://localhost:9000".to_string())
}

const USER_HEADER: &str = "x-beacon-user";

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_health_endpoint() {
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", api_base_url()))
        .send()
        .await
        .expect("Failed to call health endpoint");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
#[ignore]
async fn test_create_and_acknowledge_flow() {
    let client = reqwest::Client::new();
    let base = api_base_url();
    // Avoid colliding with rows from earlier runs
    let user_id: i64 = std::process::id() as i64 + 100_000;

    // Step 1: produce an event for an offline user
    let response = client
        .post(format!("{base}/v1/events"))
        .json(&json!({
            "event_type": "notification",
            "target_user_id": user_id,
            "priority": "high",
            "payload": {"title": "Integration", "message": "stored while offline"}
        }))
        .send()
        .await
        .expect("Failed to create event");
    assert_eq!(response.status(), 201, "expected 201 Created");
    let event: Value = response.json().await.expect("Failed to parse event");
    let event_id = event["id"].as_str().expect("event id").to_string();
    assert_eq!(event["is_read"], false);

    // Step 2: unknown event types are rejected at creation time
    let response = client
        .post(format!("{base}/v1/events"))
        .json(&json!({
            "event_type": "bogus",
            "target_user_id": user_id,
            "payload": {}
        }))
        .send()
        .await
        .expect("Failed to call create");
    assert_eq!(response.status(), 422);

    // Step 3: first acknowledgment reads the event
    let response = client
        .post(format!("{base}/v1/events/{event_id}/read"))
        .header(USER_HEADER, user_id.to_string())
        .send()
        .await
        .expect("Failed to mark read");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "read");

    // Step 4: the second acknowledgment is a distinct result, not an error
    let response = client
        .post(format!("{base}/v1/events/{event_id}/read"))
        .header(USER_HEADER, user_id.to_string())
        .send()
        .await
        .expect("Failed to mark read twice");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "already_read");
}

#[tokio::test]
#[ignore]
async fn test_stream_replays_stored_event_before_heartbeat() {
    let client = reqwest::Client::new();
    let base = api_base_url();
    let user_id: i64 = std::process::id() as i64 + 200_000;

    // Store an event while the user has no stream open
    let response = client
        .post(format!("{base}/v1/events"))
        .json(&json!({
            "event_type": "notification",
            "target_user_id": user_id,
            "payload": {"title": "Replay", "message": "recover me"}
        }))
        .send()
        .await
        .expect("Failed to create event");
    assert_eq!(response.status(), 201);

    // Open the stream; the first frame must be the stored event, not a
    // heartbeat
    let response = client
        .get(format!("{base}/v1/streams/notification"))
        .header(USER_HEADER, user_id.to_string())
        .send()
        .await
        .expect("Failed to open stream");
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let first_chunk = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let mut response = response;
        response.chunk().await
    })
    .await
    .expect("no frame before the heartbeat window")
    .expect("stream failed")
    .expect("stream ended unexpectedly");

    let frame = String::from_utf8_lossy(&first_chunk);
    assert!(
        frame.contains("event: notification"),
        "expected a notification frame, got: {frame}"
    );
    assert!(frame.contains("Replay"));
}
