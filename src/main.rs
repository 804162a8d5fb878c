mod config;
mod error;
mod llm;
mod platform;
mod poller;
mod relay;
mod server;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, InboundMode};
use crate::llm::LlmClient;
use crate::platform::greenapi::GreenApiClient;
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wa_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Instance: {}", config.whatsapp.instance_id);
    info!("  Model: {} via {}", config.llm.model, config.llm.provider);
    info!("  Inbound: {:?}", config.server.mode);
    info!("  Allowed senders: {:?}", config.relay.allowed_senders);

    let whatsapp = Arc::new(
        GreenApiClient::new(config.whatsapp.clone(), config.request_timeout)
            .context("Failed to build WhatsApp client")?,
    );
    let llm = Arc::new(
        LlmClient::new(config.llm.clone(), config.request_timeout)
            .context("Failed to build completion client")?,
    );

    match whatsapp.state_instance().await {
        Ok(state) if state == "authorized" => info!("WhatsApp session is active"),
        Ok(state) => warn!("WhatsApp instance is not authorized (state: {})", state),
        Err(e) => warn!("Could not check WhatsApp session state: {}", e),
    }

    let relay = Arc::new(Relay::new(llm, whatsapp.clone(), config.relay.clone()));

    info!("Relay is starting...");
    match config.server.mode {
        InboundMode::Webhook => {
            let token = config.server.webhook_token.clone();
            server::run(relay, config.server.bind_addr, token).await?
        }
        InboundMode::Polling => {
            poller::run(&whatsapp, &relay, config.server.poll_backoff).await?
        }
    }

    Ok(())
}
