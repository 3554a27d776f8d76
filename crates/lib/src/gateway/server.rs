//! Gateway HTTP server: send endpoint, connectivity summary, live event
//! stream, group listing, and the email report.

use crate::config::{self, Config};
use crate::correlate::{CorrelationContext, CorrelationStore};
use crate::dispatch::Dispatcher;
use crate::outbound::{MediaItem, OutboundDispatcher, OutboundMessage};
use crate::error::SendError;
use crate::relay::{NotificationRelay, RelayedEvent};
use crate::session::{
    ConnectionState, LifecycleConfig, LifecycleManager, SessionEvent, SessionProvider,
};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Body limit for /send: base64 media inflates payloads.
const SEND_BODY_LIMIT: usize = 15 * 1024 * 1024;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct RelayState {
    pub lifecycle: Arc<LifecycleManager>,
    pub provider: Arc<dyn SessionProvider>,
    pub store: Arc<CorrelationStore>,
    pub relay: Arc<NotificationRelay>,
    pub outbound: Arc<OutboundDispatcher>,
    /// Resolved once at startup; None disables panel callbacks and reports.
    pub panel_url: Option<String>,
    pub sendgrid_key: Option<String>,
    pub report_to: Option<String>,
    pub report_from: String,
    pub http: reqwest::Client,
}

/// Run the relay: start the dispatch loop and the session, then serve HTTP
/// until shutdown (Ctrl+C or SIGTERM). The provider is injected so tests and
/// deployments choose their own transport.
pub async fn run_relay(config: Config, provider: Arc<dyn SessionProvider>) -> Result<()> {
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(64);

    let lifecycle_config = LifecycleConfig {
        reconnect_delay: Duration::from_millis(config.session.reconnect_delay_ms.unwrap_or(2000)),
        ..Default::default()
    };
    let lifecycle = LifecycleManager::new(provider.clone(), events_tx, lifecycle_config);
    let store = Arc::new(CorrelationStore::default());
    let panel_url = config::resolve_panel_url(&config);
    if panel_url.is_none() {
        log::warn!("PANEL_URL not configured; panel callbacks are disabled");
    }
    let relay = Arc::new(NotificationRelay::new(panel_url.clone()));

    let dispatcher = Dispatcher {
        lifecycle: lifecycle.clone(),
        store: store.clone(),
        relay: relay.clone(),
        allowed_reactor: config::resolve_allowed_reactor(&config),
        relay_replies: config::resolve_relay_replies(&config),
    };
    tokio::spawn(dispatcher.run(events_rx));

    lifecycle.clone().start().await;

    if let Some((url, interval)) = config::resolve_keepalive(&config) {
        log::info!("keepalive ping enabled: {} every {}s", url, interval);
        let client = reqwest::Client::new();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match client.get(&url).send().await {
                    Ok(res) => log::debug!("keepalive ping {} -> {}", url, res.status()),
                    Err(e) => log::debug!("keepalive ping {} failed: {}", url, e),
                }
            }
        });
    }

    let state = RelayState {
        outbound: Arc::new(OutboundDispatcher::new(lifecycle.clone(), store.clone())),
        lifecycle,
        provider,
        store,
        relay,
        panel_url,
        sendgrid_key: config::resolve_sendgrid_key(&config),
        report_to: config::resolve_report_to(&config),
        report_from: config::resolve_report_from(&config),
        http: reqwest::Client::new(),
    };

    let app = Router::new()
        .route("/", get(health_http))
        .route("/send", post(send_http))
        .route("/events", get(events_sse))
        .route("/groups", get(groups_http))
        .route("/report/email", post(report_email))
        .layer(DefaultBodyLimit::max(SEND_BODY_LIMIT))
        .with_state(state);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// GET / returns the connectivity summary.
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    let s = state.lifecycle.state().await;
    Json(json!({
        "service": "ponte",
        "connected": s == ConnectionState::Open,
        "state": s.as_str(),
        "send": "/send",
        "events": "/events",
    }))
}

/// POST /send body. Legacy panel field names are accepted as aliases.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    #[serde(default, alias = "jid", alias = "numero")]
    destination: Option<String>,
    #[serde(default, alias = "mensagem")]
    text: String,
    #[serde(default, alias = "imagens")]
    media: Vec<MediaPayload>,
    #[serde(default)]
    context: Option<CorrelationContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaPayload {
    /// Base64-encoded bytes.
    #[serde(default)]
    data: String,
    #[serde(default = "default_media_mime", alias = "type")]
    mime_type: String,
    #[serde(default)]
    as_caption: bool,
}

fn default_media_mime() -> String {
    "image/jpeg".to_string()
}

fn error_json(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(json!({ "ok": false, "error": error.into() }))).into_response()
}

/// POST /send — run the outbound fallback sequence, return the produced ids.
async fn send_http(
    State(state): State<RelayState>,
    Json(req): Json<SendRequest>,
) -> Response {
    let mut media = Vec::with_capacity(req.media.len());
    for item in &req.media {
        let bytes = match base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            item.data.as_bytes(),
        ) {
            Ok(b) => b,
            Err(_) => return error_json(StatusCode::BAD_REQUEST, "invalid media payload"),
        };
        media.push(MediaItem {
            bytes,
            mime_type: item.mime_type.clone(),
            as_caption: item.as_caption,
        });
    }

    let message = OutboundMessage {
        destination: req.destination.unwrap_or_default(),
        text: req.text,
        media,
        context: req.context.unwrap_or_default(),
    };

    match state.outbound.send(message).await {
        Ok(result) => Json(json!({
            "ok": true,
            "messageId": result.message_id,
            "messageIds": result.message_ids,
        }))
        .into_response(),
        Err(e) => {
            let status = match &e {
                SendError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
                SendError::InvalidDestination => StatusCode::BAD_REQUEST,
                SendError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_json(status, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    agent: Option<String>,
}

fn sse_event(event: &RelayedEvent) -> Event {
    Event::default()
        .event("activity")
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}

/// GET /events?agent=NAME — snapshot of buffered events for the agent, then
/// live events as they are published. Without the agent parameter the stream
/// delivers nothing and closes.
async fn events_sse(
    State(state): State<RelayState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (snapshot, rx) = state.relay.subscribe(query.agent.as_deref()).await;
    let snapshot: Vec<Result<Event, Infallible>> =
        snapshot.iter().map(|e| Ok(sse_event(e))).collect();
    let live = UnboundedReceiverStream::new(rx).map(|e| Ok(sse_event(&e)));
    Sse::new(stream::iter(snapshot).chain(live)).keep_alive(KeepAlive::default())
}

/// GET /groups — group chats the session participates in.
async fn groups_http(State(state): State<RelayState>) -> Response {
    if !state.lifecycle.is_open().await {
        return error_json(StatusCode::SERVICE_UNAVAILABLE, "session not connected");
    }
    let query = tokio::time::timeout(Duration::from_secs(60), state.provider.list_groups());
    match query.await {
        Ok(Ok(groups)) => Json(groups).into_response(),
        Ok(Err(e)) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(_) => error_json(StatusCode::INTERNAL_SERVER_ERROR, "group query timed out"),
    }
}

/// POST /report/email — fetch the panel's request list, aggregate weekly and
/// all-time usage, and send the HTML report through SendGrid.
async fn report_email(State(state): State<RelayState>) -> Response {
    let Some(panel) = state.panel_url.as_deref() else {
        return error_json(StatusCode::BAD_REQUEST, "panel url not configured");
    };
    let Some(key) = state.sendgrid_key.as_deref() else {
        return error_json(StatusCode::BAD_REQUEST, "sendgrid api key not configured");
    };
    let Some(to) = state.report_to.as_deref() else {
        return error_json(StatusCode::BAD_REQUEST, "report recipients not configured");
    };

    let url = format!("{}/api/requests", panel);
    let items: Vec<serde_json::Value> = match state.http.get(&url).send().await {
        Ok(res) if res.status().is_success() => match res.json().await {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(_) | Err(_) => Vec::new(),
        },
        Ok(res) => {
            return error_json(
                StatusCode::BAD_GATEWAY,
                format!("panel request list returned {}", res.status()),
            )
        }
        Err(e) => {
            return error_json(
                StatusCode::BAD_GATEWAY,
                format!("failed to fetch panel requests: {}", e),
            )
        }
    };

    let html = build_report_html(&items, Utc::now());
    let to_list: Vec<serde_json::Value> = to
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|e| json!({ "email": e }))
        .collect();
    let payload = json!({
        "personalizations": [{ "to": to_list }],
        "from": { "email": state.report_from, "name": "Ponte Relay" },
        "subject": "Relatório de Uso do Painel (Semanal e Geral)",
        "content": [{ "type": "text/html", "value": html }],
    });

    match state
        .http
        .post(SENDGRID_SEND_URL)
        .bearer_auth(key)
        .json(&payload)
        .send()
        .await
    {
        Ok(res) if res.status() == StatusCode::ACCEPTED => {
            log::info!("usage report emailed to {}", to);
            Json(json!({ "ok": true })).into_response()
        }
        Ok(res) => {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            let sample: String = body.chars().take(200).collect();
            log::warn!("sendgrid send returned {}: {}", status, sample);
            error_json(
                StatusCode::BAD_GATEWAY,
                format!("sendgrid returned {}", status),
            )
        }
        Err(e) => error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("sendgrid request failed: {}", e),
        ),
    }
}

fn parse_created_at(item: &serde_json::Value) -> Option<DateTime<Utc>> {
    item.get("createdAt")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn str_field(item: &serde_json::Value, name: &str) -> String {
    match item.get(name).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => "—".to_string(),
    }
}

fn count_by<'a, I, F>(items: I, f: F) -> HashMap<String, usize>
where
    I: IntoIterator<Item = &'a serde_json::Value>,
    F: Fn(&serde_json::Value) -> String,
{
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(f(item)).or_insert(0) += 1;
    }
    counts
}

/// "key: count" lines, highest count first (key breaks ties for stable
/// output).
fn format_counts(counts: &HashMap<String, usize>) -> String {
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    entries
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join("<br>")
}

fn build_report_html(items: &[serde_json::Value], now: DateTime<Utc>) -> String {
    let week_ago = now - chrono::Duration::days(7);
    let in_week: Vec<&serde_json::Value> = items
        .iter()
        .filter(|x| parse_created_at(x).map(|t| t >= week_ago).unwrap_or(false))
        .collect();

    let by_status_week = count_by(in_week.iter().copied(), |x| {
        str_field(x, "status").to_lowercase()
    });
    let by_status_all = count_by(items, |x| str_field(x, "status").to_lowercase());
    let by_agent_week = count_by(in_week.iter().copied(), |x| str_field(x, "agente"));
    let by_agent_all = count_by(items, |x| str_field(x, "agente"));
    let per_day_week = count_by(in_week.iter().copied(), |x| {
        parse_created_at(x)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "—".to_string())
    });

    format!(
        "<h2>Relatório de Uso do Painel</h2>\
         <h3>Últimos 7 dias</h3>\
         Total: {week_total}<br>\
         Por dia:<br>{per_day}<br><br>\
         Por status:<br>{status_week}<br><br>\
         Por agente:<br>{agent_week}<br><br>\
         <h3>Geral</h3>\
         Total: {all_total}<br>\
         Por status:<br>{status_all}<br><br>\
         Por agente:<br>{agent_all}<br><br>\
         <small>Gerado em {generated}</small>",
        week_total = in_week.len(),
        per_day = format_counts(&per_day_week),
        status_week = format_counts(&by_status_week),
        agent_week = format_counts(&by_agent_week),
        all_total = items.len(),
        status_all = format_counts(&by_status_all),
        agent_all = format_counts(&by_agent_all),
        generated = now.format("%Y-%m-%d %H:%M UTC"),
    )
}
