//! Integration test: start the relay on a free port with the loopback
//! provider, then exercise the HTTP surface (health, send, event stream).
//! The server task is left running when the test ends.

use lib::config::Config;
use lib::gateway;
use lib::session::LoopbackProvider;
use std::sync::Arc;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_relay() -> (String, Arc<LoopbackProvider>) {
    let port = free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.session.reconnect_delay_ms = Some(20);

    let provider = Arc::new(LoopbackProvider::new());
    let provider_for_relay = provider.clone();
    tokio::spawn(async move {
        let _ = gateway::run_relay(config, provider_for_relay).await;
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/", base)).send().await {
            if resp.status().is_success() {
                let json: serde_json::Value = resp.json().await.expect("health JSON");
                if json.get("connected").and_then(|v| v.as_bool()) == Some(true) {
                    return (base, provider);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("relay on {} did not become connected within 5s", base);
}

#[tokio::test]
async fn health_reports_connected_state() {
    let (base, _provider) = start_relay().await;
    let json: serde_json::Value = reqwest::get(format!("{}/", base))
        .await
        .expect("GET /")
        .json()
        .await
        .expect("health JSON");
    assert_eq!(json.get("connected").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(json.get("state").and_then(|v| v.as_str()), Some("open"));
}

#[tokio::test]
async fn send_returns_ids_and_normalizes_destination() {
    let (base, provider) = start_relay().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/send", base))
        .json(&serde_json::json!({
            "destination": "5511999998888",
            "text": "Cliente: Ana\nAgente: Maria"
        }))
        .send()
        .await
        .expect("POST /send");
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.expect("send JSON");
    assert_eq!(json.get("ok").and_then(|v| v.as_bool()), Some(true));
    let message_id = json
        .get("messageId")
        .and_then(|v| v.as_str())
        .expect("messageId");
    assert!(!message_id.is_empty());
    assert_eq!(
        json.get("messageIds").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let sent = provider.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, "5511999998888@s.whatsapp.net");
    assert_eq!(sent[0].message_id, message_id);
}

#[tokio::test]
async fn group_destination_gets_group_suffix() {
    let (base, provider) = start_relay().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/send", base))
        .json(&serde_json::json!({ "numero": "123456-789", "mensagem": "oi grupo" }))
        .send()
        .await
        .expect("POST /send");
    assert_eq!(resp.status(), 200);

    let sent = provider.sent().await;
    assert_eq!(sent[0].destination, "123456-789@g.us");
}

#[tokio::test]
async fn empty_destination_is_a_bad_request() {
    let (base, _provider) = start_relay().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/send", base))
        .json(&serde_json::json!({ "destination": "", "text": "oi" }))
        .send()
        .await
        .expect("POST /send");
    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.expect("error JSON");
    assert_eq!(json.get("ok").and_then(|v| v.as_bool()), Some(false));
}

#[tokio::test]
async fn invalid_media_payload_is_a_bad_request() {
    let (base, _provider) = start_relay().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/send", base))
        .json(&serde_json::json!({
            "destination": "5511999998888",
            "text": "oi",
            "media": [{ "data": "not base64!!!" }]
        }))
        .send()
        .await
        .expect("POST /send");
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn event_stream_without_agent_closes_empty() {
    let (base, _provider) = start_relay().await;

    let resp = reqwest::get(format!("{}/events", base))
        .await
        .expect("GET /events");
    assert_eq!(resp.status(), 200);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
    // No agent filter: the stream ends immediately with no events.
    let body = tokio::time::timeout(Duration::from_secs(5), resp.text())
        .await
        .expect("stream should close")
        .expect("read body");
    assert!(body.is_empty(), "expected empty stream, got: {:?}", body);
}

#[tokio::test]
async fn groups_endpoint_responds_when_connected() {
    let (base, _provider) = start_relay().await;
    let resp = reqwest::get(format!("{}/groups", base))
        .await
        .expect("GET /groups");
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.expect("groups JSON");
    assert!(json.as_array().is_some());
}
