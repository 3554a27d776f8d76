//! End-to-end correlation flow against a stub panel: send through the
//! loopback provider, inject inbound reactions/replies, and assert the panel
//! webhook calls (including the single-retry policy).

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use lib::correlate::CorrelationStore;
use lib::dispatch::Dispatcher;
use lib::outbound::{OutboundDispatcher, OutboundMessage};
use lib::relay::NotificationRelay;
use lib::session::{
    LifecycleConfig, LifecycleManager, LoopbackProvider, SessionEvent, SessionProvider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Stub panel: counts callback hits and captures the last payloads.
#[derive(Default)]
struct PanelStub {
    auto_status: AtomicUsize,
    replies: AtomicUsize,
    last_auto_status: Mutex<Option<serde_json::Value>>,
    last_reply: Mutex<Option<serde_json::Value>>,
    /// When set, every callback returns 500 (exercises the retry path).
    always_fail: bool,
}

async fn auto_status_hook(
    State(stub): State<Arc<PanelStub>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    stub.auto_status.fetch_add(1, Ordering::SeqCst);
    *stub.last_auto_status.lock().await = Some(body);
    if stub.always_fail {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn reply_hook(
    State(stub): State<Arc<PanelStub>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    stub.replies.fetch_add(1, Ordering::SeqCst);
    *stub.last_reply.lock().await = Some(body);
    if stub.always_fail {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn start_panel_stub(always_fail: bool) -> (String, Arc<PanelStub>) {
    let stub = Arc::new(PanelStub {
        always_fail,
        ..Default::default()
    });
    let app = Router::new()
        .route("/api/requests/auto-status", post(auto_status_hook))
        .route("/api/requests/reply", post(reply_hook))
        .with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub panel");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), stub)
}

struct Engine {
    provider: Arc<LoopbackProvider>,
    outbound: OutboundDispatcher,
}

/// Wire up the full engine (without the HTTP gateway) against a panel URL.
async fn start_engine(panel_url: String) -> Engine {
    let provider = Arc::new(LoopbackProvider::new());
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(64);
    let lifecycle = LifecycleManager::new(
        provider.clone() as Arc<dyn SessionProvider>,
        events_tx,
        LifecycleConfig {
            reconnect_delay: Duration::from_millis(20),
            open_timeout: Duration::from_secs(5),
        },
    );
    let store = Arc::new(CorrelationStore::default());
    let relay = Arc::new(NotificationRelay::new(Some(panel_url)));
    let dispatcher = Dispatcher {
        lifecycle: lifecycle.clone(),
        store: store.clone(),
        relay,
        allowed_reactor: None,
        relay_replies: true,
    };
    tokio::spawn(dispatcher.run(events_rx));
    lifecycle.clone().start().await;

    for _ in 0..100 {
        if lifecycle.is_open().await {
            return Engine {
                provider,
                outbound: OutboundDispatcher::new(lifecycle, store),
            };
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine did not connect within 1s");
}

fn reaction_upsert(message_id: &str, reactor_jid: &str, emoji: &str) -> SessionEvent {
    let item = serde_json::from_value(serde_json::json!({
        "key": { "remoteJid": reactor_jid, "id": "EV-1" },
        "message": {
            "reactionMessage": { "text": emoji, "key": { "id": message_id } }
        }
    }))
    .expect("raw message");
    SessionEvent::MessagesUpserted(vec![item])
}

fn reply_upsert(quoted_id: &str, reactor_jid: &str, text: &str) -> SessionEvent {
    let item = serde_json::from_value(serde_json::json!({
        "key": { "remoteJid": reactor_jid, "id": "EV-2" },
        "message": {
            "extendedTextMessage": {
                "text": text,
                "contextInfo": { "stanzaId": quoted_id }
            }
        }
    }))
    .expect("raw message");
    SessionEvent::MessagesUpserted(vec![item])
}

async fn wait_for_count(counter: &AtomicUsize, expected: usize, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if counter.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected counter to reach {}, got {}",
        expected,
        counter.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn done_reaction_triggers_exactly_one_auto_status_post() {
    let (panel_url, stub) = start_panel_stub(false).await;
    let engine = start_engine(panel_url).await;

    let result = engine
        .outbound
        .send(OutboundMessage {
            destination: "5511999998888".to_string(),
            text: "Cliente: Ana\nAgente: Maria".to_string(),
            ..Default::default()
        })
        .await
        .expect("send");

    engine
        .provider
        .emit(reaction_upsert(
            &result.message_id,
            "5511888887777@s.whatsapp.net",
            "✅",
        ))
        .await;

    wait_for_count(&stub.auto_status, 1, Duration::from_secs(3)).await;
    // Delivery succeeded; no retry may follow.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(stub.auto_status.load(Ordering::SeqCst), 1);

    let body = stub.last_auto_status.lock().await.clone().expect("payload");
    assert_eq!(
        body.get("waMessageId").and_then(|v| v.as_str()),
        Some(result.message_id.as_str())
    );
    assert_eq!(
        body.get("reactor").and_then(|v| v.as_str()),
        Some("5511888887777")
    );
    assert_eq!(body.get("status").and_then(|v| v.as_str()), Some("feito"));
    assert_eq!(body.get("emoji").and_then(|v| v.as_str()), Some("✅"));
}

#[tokio::test]
async fn failed_webhook_is_retried_exactly_once() {
    let (panel_url, stub) = start_panel_stub(true).await;
    let engine = start_engine(panel_url).await;

    let result = engine
        .outbound
        .send(OutboundMessage {
            destination: "5511999998888".to_string(),
            text: "Agente: Maria".to_string(),
            ..Default::default()
        })
        .await
        .expect("send");

    engine
        .provider
        .emit(reaction_upsert(
            &result.message_id,
            "5511888887777@s.whatsapp.net",
            "✅",
        ))
        .await;

    // First attempt plus the single retry, then the event is dropped.
    wait_for_count(&stub.auto_status, 2, Duration::from_secs(3)).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(stub.auto_status.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reply_to_relay_sent_message_reaches_the_panel() {
    let (panel_url, stub) = start_panel_stub(false).await;
    let engine = start_engine(panel_url).await;

    let result = engine
        .outbound
        .send(OutboundMessage {
            destination: "5511999998888".to_string(),
            text: "Agente: Maria".to_string(),
            ..Default::default()
        })
        .await
        .expect("send");

    engine
        .provider
        .emit(reply_upsert(
            &result.message_id,
            "5511888887777@s.whatsapp.net",
            "resolvido, obrigado",
        ))
        .await;

    wait_for_count(&stub.replies, 1, Duration::from_secs(3)).await;
    let body = stub.last_reply.lock().await.clone().expect("payload");
    assert_eq!(
        body.get("waMessageId").and_then(|v| v.as_str()),
        Some(result.message_id.as_str())
    );
    assert_eq!(
        body.get("text").and_then(|v| v.as_str()),
        Some("resolvido, obrigado")
    );
}

#[tokio::test]
async fn reply_to_unknown_message_never_reaches_the_panel() {
    let (panel_url, stub) = start_panel_stub(false).await;
    let engine = start_engine(panel_url).await;

    engine
        .provider
        .emit(reply_upsert(
            "NEVER-SENT",
            "5511888887777@s.whatsapp.net",
            "sobre aquilo",
        ))
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(stub.replies.load(Ordering::SeqCst), 0);
}
