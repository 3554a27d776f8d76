//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.ponte/config.json`) and
//! environment. Every option is read once at startup; there is no hot-reload.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway bind and port.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Panel callback settings (endpoint, allow-list, reply relay).
    #[serde(default)]
    pub panel: PanelConfig,

    /// Session provider settings (credential directory, reconnect delay).
    #[serde(default)]
    pub session: SessionConfig,

    /// Optional keepalive self-ping (for hosts that idle out).
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Email report settings (SendGrid).
    #[serde(default)]
    pub report: ReportConfig,
}

/// Gateway bind address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 3000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; dashboard callers are not
    /// authenticated, front with a reverse proxy when exposure matters).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Panel callback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig {
    /// Base URL of the panel (e.g. "https://painel.example.com").
    /// Overridden by PANEL_URL env. Callbacks are skipped when unset.
    pub url: Option<String>,

    /// Digits of the identity allowed to action reactions/replies.
    /// Overridden by AUTHORIZED_REACTION_NUMBER env. Unset = everyone.
    pub allowed_reactor: Option<String>,

    /// Relay quoted replies to the panel (default true). RELAY_REPLIES=0
    /// disables.
    #[serde(default = "default_true")]
    pub relay_replies: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            url: None,
            allowed_reactor: None,
            relay_replies: true,
        }
    }
}

/// Session provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Credential/session-state directory, fully owned by the provider
    /// (default ~/.ponte/auth). Deleted wholesale on a logged-out close.
    pub credential_dir: Option<PathBuf>,

    /// Delay before each reconnect attempt, in milliseconds (default 2000).
    pub reconnect_delay_ms: Option<u64>,
}

/// Keepalive self-ping: GET `url` every `interval_secs` while enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepaliveConfig {
    #[serde(default)]
    pub enabled: bool,

    /// URL to ping (typically the relay's own public URL). Overridden by
    /// KEEPALIVE_URL env; setting the env also enables the ping.
    pub url: Option<String>,

    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
}

fn default_keepalive_interval() -> u64 {
    300
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            interval_secs: default_keepalive_interval(),
        }
    }
}

/// Email report settings. The SendGrid key comes from config or the
/// SENDGRID_API_KEY env (env wins).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    pub sendgrid_api_key: Option<String>,
    /// Comma-separated recipient list. Overridden by REPORT_TO env.
    pub to: Option<String>,
    /// Sender address (default "no-reply@ponte.local"). REPORT_FROM env wins.
    pub from: Option<String>,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the panel base URL: env PANEL_URL overrides config. Trailing
/// slashes are trimmed so callback paths can be appended directly.
pub fn resolve_panel_url(config: &Config) -> Option<String> {
    env_nonempty("PANEL_URL")
        .or_else(|| config.panel.url.clone())
        .map(|u| u.trim_end_matches('/').to_string())
}

/// Resolve the allowed-reactor identity: env AUTHORIZED_REACTION_NUMBER
/// overrides config. Returned as configured; digit normalization happens at
/// the check site.
pub fn resolve_allowed_reactor(config: &Config) -> Option<String> {
    env_nonempty("AUTHORIZED_REACTION_NUMBER").or_else(|| config.panel.allowed_reactor.clone())
}

/// Whether quoted replies are relayed: RELAY_REPLIES env ("0"/"false"
/// disables, anything else enables) overrides config.
pub fn resolve_relay_replies(config: &Config) -> bool {
    match env_nonempty("RELAY_REPLIES") {
        Some(v) => !matches!(v.as_str(), "0" | "false"),
        None => config.panel.relay_replies,
    }
}

/// Resolve the credential directory (default ~/.ponte/auth).
pub fn resolve_credential_dir(config: &Config) -> PathBuf {
    config.session.credential_dir.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .map(|h| h.join(".ponte").join("auth"))
            .unwrap_or_else(|| PathBuf::from("auth"))
    })
}

/// Resolve the keepalive ping target: (url, interval_secs) when enabled.
/// KEEPALIVE_URL env overrides config.url and enables the ping;
/// KEEPALIVE_INTERVAL env overrides the interval.
pub fn resolve_keepalive(config: &Config) -> Option<(String, u64)> {
    let env_url = env_nonempty("KEEPALIVE_URL");
    let enabled = env_url.is_some() || config.keepalive.enabled;
    let url = env_url.or_else(|| config.keepalive.url.clone())?;
    if !enabled {
        return None;
    }
    let interval = env_nonempty("KEEPALIVE_INTERVAL")
        .and_then(|v| v.parse().ok())
        .unwrap_or(config.keepalive.interval_secs);
    Some((url, interval))
}

/// Resolve the SendGrid API key: env SENDGRID_API_KEY overrides config.
pub fn resolve_sendgrid_key(config: &Config) -> Option<String> {
    env_nonempty("SENDGRID_API_KEY").or_else(|| config.report.sendgrid_api_key.clone())
}

/// Resolve report recipients (comma-separated): env REPORT_TO overrides.
pub fn resolve_report_to(config: &Config) -> Option<String> {
    env_nonempty("REPORT_TO").or_else(|| config.report.to.clone())
}

/// Resolve the report sender: env REPORT_FROM, then config, then default.
pub fn resolve_report_from(config: &Config) -> String {
    env_nonempty("REPORT_FROM")
        .or_else(|| config.report.from.clone())
        .unwrap_or_else(|| "no-reply@ponte.local".to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PONTE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".ponte").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or PONTE_CONFIG_PATH). Missing file =>
/// default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 3000);
        assert_eq!(g.bind, "0.0.0.0");
    }

    #[test]
    fn replies_relayed_by_default() {
        let config = Config::default();
        assert!(resolve_relay_replies(&config));
    }

    #[test]
    fn panel_url_trailing_slash_trimmed() {
        let mut config = Config::default();
        config.panel.url = Some("https://panel.example.com/".to_string());
        assert_eq!(
            resolve_panel_url(&config).as_deref(),
            Some("https://panel.example.com")
        );
    }

    #[test]
    fn keepalive_disabled_without_url() {
        let mut config = Config::default();
        config.keepalive.enabled = true;
        assert!(resolve_keepalive(&config).is_none());
    }

    #[test]
    fn keepalive_from_config() {
        let mut config = Config::default();
        config.keepalive.enabled = true;
        config.keepalive.url = Some("https://relay.example.com/".to_string());
        config.keepalive.interval_secs = 60;
        assert_eq!(
            resolve_keepalive(&config),
            Some(("https://relay.example.com/".to_string(), 60))
        );
    }

    #[test]
    fn config_json_round_trip() {
        let json = r#"{
            "gateway": { "port": 8080 },
            "panel": { "url": "https://p.example", "allowedReactor": "5511999998888", "relayReplies": false },
            "session": { "reconnectDelayMs": 500 }
        }"#;
        let config: Config = serde_json::from_str(json).expect("parse config");
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert_eq!(config.panel.allowed_reactor.as_deref(), Some("5511999998888"));
        assert!(!config.panel.relay_replies);
        assert_eq!(config.session.reconnect_delay_ms, Some(500));
    }
}
