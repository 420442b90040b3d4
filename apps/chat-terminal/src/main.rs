mod bridge;
mod config;
mod input;
mod logging;
mod render;
mod state;

use std::{
    error::Error,
    io::{self, Write},
    sync::Arc,
};

use chat_backend::{HttpChatApi, WsTransport, spawn_session};
use chat_platform::InMemoryIdentity;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::{
    bridge::{RenderCallback, TerminalBridge},
    config::TerminalConfig,
    input::parse_line,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init();
    info!("starting chat-terminal");

    let config = TerminalConfig::from_env()?;
    let identity = match &config.identity {
        Some(identity) => InMemoryIdentity::signed_in(identity.user(), identity.token.clone()),
        None => {
            warn!("CHAT_USER_ID/CHAT_TOKEN not set; the session will not start");
            InMemoryIdentity::default()
        }
    };

    let api = HttpChatApi::new(config.api_url.clone(), config.request_timeout)?;
    let transport = WsTransport::from_api_base(&config.api_url)?;
    info!(api_url = %config.api_url, "backend configured");

    let session = spawn_session(
        config.session_config(),
        Arc::new(api),
        Arc::new(transport),
        Arc::new(identity),
    );

    let render: RenderCallback = Arc::new(|snapshot| {
        let frame = render::render(&snapshot);
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(frame.as_bytes());
        let _ = stdout.flush();
    });
    let bridge = TerminalBridge::spawn(&config, session, render);
    bridge.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !bridge.apply(parse_line(&line)).await {
            break;
        }
    }

    info!("chat-terminal exiting");
    Ok(())
}
