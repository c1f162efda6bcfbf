//! Telegram delivery channel and command loop
//!
//! `sendMessage` is the delivery primitive; a `getUpdates` long-poll task
//! turns /start and /stop into registry mutations. A 403 or a "chat not
//! found" reply means the recipient is gone for good; everything else is
//! worth retrying on the next event.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::detector::delta_percent;
use crate::error::DeliveryError;
use crate::notify::{format_message, DeliveryChannel};
use crate::persistence::{RatioStore, SubscriberRegistry};
use crate::types::ChangeEvent;

const UNSUBSCRIBED_TEXT: &str =
    "You've unsubscribed from xSushi ratio updates. Use /start to subscribe again.";
const NO_DATA_TEXT: &str = "Welcome! No data yet, check back soon.";

#[derive(Debug, Deserialize)]
struct TelegramReply<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
}

/// First token of the text, with any `@botname` suffix stripped.
fn parse_command(text: &str) -> Option<Command> {
    let first = text.trim().split_whitespace().next()?;
    let bare = first.split('@').next()?;
    match bare {
        "/start" => Some(Command::Start),
        "/stop" => Some(Command::Stop),
        _ => None,
    }
}

fn classify_send_failure(status: StatusCode, description: Option<&str>) -> DeliveryError {
    let description = description.unwrap_or("").to_string();
    if status == StatusCode::FORBIDDEN
        || description.to_lowercase().contains("chat not found")
    {
        DeliveryError::Permanent(format!("HTTP {status}: {description}"))
    } else {
        DeliveryError::Transient(format!("HTTP {status}: {description}"))
    }
}

/// Telegram Bot API client
pub struct TelegramClient {
    send_client: Client,
    poll_client: Client,
    base: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str, poll_timeout_secs: u64) -> anyhow::Result<Self> {
        let send_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        // Long-poll requests must outlive the server-side timeout
        let poll_client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()?;

        Ok(Self {
            send_client,
            poll_client,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            poll_timeout_secs,
        })
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, reqwest::Error> {
        let reply: TelegramReply<Vec<Update>> = self
            .poll_client
            .get(format!("{}/getUpdates", self.base))
            .query(&[("timeout", self.poll_timeout_secs as i64), ("offset", offset)])
            .send()
            .await?
            .json()
            .await?;

        Ok(reply.result.unwrap_or_default())
    }
}

#[async_trait]
impl DeliveryChannel for TelegramClient {
    async fn send(&self, user_id: i64, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .send_client
            .post(format!("{}/sendMessage", self.base))
            .json(&json!({ "chat_id": user_id, "text": text }))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reply: Option<TelegramReply<serde_json::Value>> = response.json().await.ok();
        let description = reply
            .filter(|r| !r.ok)
            .and_then(|r| r.description);
        Err(classify_send_failure(status, description.as_deref()))
    }
}

/// Welcome body for a fresh /start: the current data when the store has any,
/// otherwise the no-data variant.
async fn welcome_text(store: &RatioStore) -> String {
    let event = match store.previous(2).await {
        Ok(pair) => Some(ChangeEvent {
            previous_ratio: pair[1].ratio,
            current_ratio: pair[0].ratio,
            delta_percent: delta_percent(pair[1].ratio, pair[0].ratio),
            timestamp: pair[0].timestamp,
        }),
        Err(_) => store.latest().await.ok().map(|sample| ChangeEvent {
            previous_ratio: sample.ratio,
            current_ratio: sample.ratio,
            delta_percent: Decimal::ZERO,
            timestamp: sample.timestamp,
        }),
    };

    match event {
        Some(event) => format_message(&event),
        None => NO_DATA_TEXT.to_string(),
    }
}

/// Long-poll loop mapping /start and /stop onto the registry.
pub async fn run_command_loop(
    client: Arc<TelegramClient>,
    registry: Arc<SubscriberRegistry>,
    store: Arc<RatioStore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("Telegram command loop started");
    let mut offset: i64 = 0;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Telegram command loop shutting down");
                break;
            }
            result = client.get_updates(offset) => {
                let updates = match result {
                    Ok(updates) => updates,
                    Err(e) => {
                        warn!(error = %e, "getUpdates failed, backing off");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for update in updates {
                    offset = offset.max(update.update_id + 1);

                    let Some(message) = update.message else { continue };
                    let Some(command) = message.text.as_deref().and_then(parse_command) else {
                        continue;
                    };
                    let user_id = message.chat.id;

                    let reply = match command {
                        Command::Start => {
                            if let Err(e) = registry.subscribe(user_id).await {
                                warn!(user_id, error = %e, "Subscribe failed");
                                continue;
                            }
                            welcome_text(&store).await
                        }
                        Command::Stop => {
                            if let Err(e) = registry.unsubscribe(user_id).await {
                                warn!(user_id, error = %e, "Unsubscribe failed");
                                continue;
                            }
                            UNSUBSCRIBED_TEXT.to_string()
                        }
                    };

                    if let Err(e) = client.send(user_id, &reply).await {
                        warn!(user_id, error = %e, "Command reply failed");
                    }
                }
            }
        }
    }
}
