use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error};

use crate::config::Config;
use crate::protocol::ServerMessage;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

type ClientStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Parser, Debug)]
#[command(name = "tank-relay")]
#[command(about = "Tank relay server and controller client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server (default when no command is given)
    Serve(ServeArgs),

    /// Send one command to a tank through a running relay
    Control {
        /// Relay URL (e.g., ws://localhost:8000)
        #[arg(short, long, default_value = "ws://localhost:8000")]
        url: String,

        /// Tank to select
        #[arg(short, long)]
        tank: String,

        /// forward, backward, left, right, stop or setspeed
        action: String,

        #[arg(long, allow_negative_numbers = true)]
        left: Option<i64>,

        #[arg(long, allow_negative_numbers = true)]
        right: Option<i64>,
    },

    /// Print everything the relay sends for a tank
    Watch {
        #[arg(short, long, default_value = "ws://localhost:8000")]
        url: String,

        #[arg(short, long)]
        tank: String,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Address to bind (overrides RELAY_BIND)
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory containing index.html (overrides RELAY_PAGE_DIR)
    #[arg(long)]
    pub page_dir: Option<PathBuf>,
}

impl ServeArgs {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.page_dir {
            config.page_dir = dir.clone();
        }
        config
    }
}

async fn connect_control(url: &str) -> Result<ClientStream> {
    let ws_url = format!("{}/ws/control", url.trim_end_matches('/'));
    debug!("Connecting to {}", ws_url);
    match timeout(CLIENT_TIMEOUT, connect_async(&ws_url)).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", ws_url, e);
            Err(anyhow!("Connection failed: {}", e))
        }
        Err(_) => Err(anyhow!(
            "Connection timeout - is the relay running at {}?",
            url
        )),
    }
}

/// Next relay frame as JSON, skipping non-text frames.
async fn next_frame(stream: &mut ClientStream) -> Result<Value> {
    let frame = timeout(CLIENT_TIMEOUT, async {
        while let Some(msg) = stream.next().await {
            if let Message::Text(text) = msg? {
                return Ok::<_, anyhow::Error>(serde_json::from_str::<Value>(text.as_str())?);
            }
        }
        Err(anyhow!("Relay closed the connection"))
    })
    .await;
    frame.map_err(|_| anyhow!("Timed out waiting for the relay"))?
}

async fn send_json(stream: &mut ClientStream, value: Value) -> Result<()> {
    stream.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn select_tank(stream: &mut ClientStream, tank: &str) -> Result<()> {
    send_json(stream, json!({"type": "select", "tankId": tank})).await?;
    loop {
        let frame = next_frame(stream).await?;
        if let Ok(ServerMessage::Selected { online, .. }) = serde_json::from_value::<ServerMessage>(frame) {
            if !online {
                eprintln!("Tank {} is not online", tank);
            }
            return Ok(());
        }
    }
}

pub async fn run_control_client(
    url: String,
    tank: String,
    action: String,
    left: Option<i64>,
    right: Option<i64>,
) -> Result<()> {
    let mut stream = connect_control(&url).await?;

    let hello = next_frame(&mut stream).await?;
    if let Ok(ServerMessage::Hello { tanks_online }) = serde_json::from_value::<ServerMessage>(hello) {
        println!("Tanks online: {}", tanks_online.join(", "));
    }
    select_tank(&mut stream, &tank).await?;

    let mut cmd = json!({"type": "cmd", "tankId": tank, "action": action});
    if let Some(left) = left {
        cmd["leftSpeed"] = json!(left);
    }
    if let Some(right) = right {
        cmd["rightSpeed"] = json!(right);
    }
    send_json(&mut stream, cmd).await?;

    let outcome = loop {
        let frame = next_frame(&mut stream).await?;
        match serde_json::from_value::<ServerMessage>(frame) {
            Ok(ServerMessage::Ack { tank_id, command }) => {
                println!("{} acknowledged {}", tank_id, command.as_str());
                break Ok(());
            }
            Ok(ServerMessage::Error { error, detail, .. }) => {
                break Err(match detail {
                    Some(detail) => anyhow!("Relay error: {} ({})", error, detail),
                    None => anyhow!("Relay error: {}", error),
                });
            }
            // Status and presence frames for the selected tank can arrive first.
            _ => continue,
        }
    };

    let _ = stream.send(Message::Close(None)).await;
    outcome
}

pub async fn run_watch_client(url: String, tank: String) -> Result<()> {
    let mut stream = connect_control(&url).await?;
    next_frame(&mut stream).await?;
    select_tank(&mut stream, &tank).await?;
    println!("Watching {} (Ctrl-C to stop)", tank);

    while let Some(msg) = stream.next().await {
        match msg? {
            Message::Text(text) => println!("{}", text.as_str()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
