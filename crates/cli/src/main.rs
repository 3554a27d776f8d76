use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ponte")]
#[command(about = "Ponte — WhatsApp panel relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay (session lifecycle + panel gateway). Without a wire
    /// provider compiled in, the loopback provider is used: sends are
    /// recorded locally, which is enough to integrate a panel end-to-end.
    Serve {
        /// Config file path (default: PONTE_CONFIG_PATH or ~/.ponte/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config, PORT env, or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Query a running relay's connectivity summary.
    Status {
        /// Base URL of the relay (default http://127.0.0.1:3000)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },

    /// Send a text message through a running relay.
    Send {
        /// Destination: phone digits or group id (suffix added automatically)
        destination: String,

        /// Message body
        text: String,

        /// Base URL of the relay (default http://127.0.0.1:3000)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("ponte {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Status { url }) => {
            if let Err(e) = run_status(url).await {
                log::error!("status failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            destination,
            text,
            url,
        }) => {
            if let Err(e) = run_send(destination, text, url).await {
                log::error!("send failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    } else if let Ok(p) = std::env::var("PORT") {
        if let Ok(p) = p.trim().parse() {
            config.gateway.port = p;
        }
    }
    log::info!(
        "starting relay on {}:{} (credentials at {})",
        config.gateway.bind,
        config.gateway.port,
        lib::config::resolve_credential_dir(&config).display()
    );
    let provider = Arc::new(lib::session::LoopbackProvider::new());
    log::warn!("using the loopback session provider; no wire protocol attached");
    lib::gateway::run_relay(config, provider).await
}

fn base_url(url: Option<String>) -> String {
    url.unwrap_or_else(|| "http://127.0.0.1:3000".to_string())
        .trim_end_matches('/')
        .to_string()
}

async fn run_status(url: Option<String>) -> anyhow::Result<()> {
    let url = format!("{}/", base_url(url));
    let res = reqwest::get(&url).await?;
    let status = res.status();
    let body: serde_json::Value = res.json().await?;
    println!("{} -> {}", url, status);
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn run_send(destination: String, text: String, url: Option<String>) -> anyhow::Result<()> {
    let url = format!("{}/send", base_url(url));
    let client = reqwest::Client::new();
    let res = client
        .post(&url)
        .json(&serde_json::json!({ "destination": destination, "text": text }))
        .send()
        .await?;
    let status = res.status();
    let body: serde_json::Value = res.json().await.unwrap_or_else(|_| serde_json::json!({}));
    if status.is_success() {
        println!(
            "sent: {}",
            body.get("messageId").and_then(|v| v.as_str()).unwrap_or("?")
        );
    } else {
        anyhow::bail!(
            "relay returned {}: {}",
            status,
            body.get("error").and_then(|v| v.as_str()).unwrap_or("?")
        );
    }
    Ok(())
}
