// src/notify/telegram.rs
//! Telegram Bot API channel (`sendMessage`, HTML parse mode).

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Ack, MessageChannel, Recipient};
use crate::error::{RelayError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramChannel {
    api_base: String,
    token: String,
    client: Client,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let token = token.into();
        anyhow::ensure!(!token.trim().is_empty(), "Telegram bot token must not be empty");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build Telegram HTTP client")?;
        Ok(Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            client,
        })
    }

    /// Point the channel at another Bot API server (self-hosted or a test stub).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[async_trait::async_trait]
impl MessageChannel for TelegramChannel {
    async fn send(&self, recipient: &Recipient, text: &str) -> Result<Ack> {
        let body = SendMessage {
            chat_id: &recipient.0,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        // `without_url` keeps the bot token out of error messages and logs.
        let rsp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::SendFailure(e.without_url().to_string()))?;

        let status = rsp.status();
        let parsed: ApiResponse = rsp.json().await.map_err(|e| {
            RelayError::SendFailure(format!("HTTP {status}: {}", e.without_url()))
        })?;

        if !parsed.ok {
            return Err(RelayError::SendFailure(format!(
                "HTTP {status}: {}",
                parsed
                    .description
                    .unwrap_or_else(|| "unknown Telegram API error".into())
            )));
        }

        tracing::debug!(target: "notify", chat_id = %recipient, "telegram message accepted");
        Ok(Ack {
            message_id: parsed.result.map(|m| m.message_id),
        })
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
