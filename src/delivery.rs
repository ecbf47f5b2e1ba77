//! Outbound delivery channels.
//!
//! The scheduler hands each prepared post to a [`DeliveryChannel`] exactly
//! once and treats any error as a failed attempt; channels do not retry.

use crate::error::{Error, Result};
use crate::utils::truncate_for_log;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Default Bot API endpoint.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Something that can publish a post to a destination.
pub trait DeliveryChannel: Send + Sync {
    fn send_post(
        &self,
        destination: &str,
        text: &str,
        image: Option<&Path>,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API channel.
///
/// Posts are sent as a photo with the text as its caption. When the photo
/// upload is refused (oversized caption, bad image, network error), the text
/// alone is sent with `sendMessage`.
#[derive(Debug, Clone)]
pub struct TelegramChannel {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            token: token.into(),
        })
    }

    /// Point the channel at another Bot API server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn check(response: reqwest::Response, method: &str) -> Result<()> {
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<ApiReply>(&body) {
            Ok(reply) if reply.ok => Ok(()),
            Ok(reply) => Err(Error::Delivery(format!(
                "{method}: {}",
                reply.description.unwrap_or_else(|| status.to_string())
            ))),
            Err(_) => Err(Error::Delivery(format!(
                "{method}: HTTP {status}: {}",
                truncate_for_log(&body, 200)
            ))),
        }
    }

    async fn send_photo(&self, chat_id: &str, caption: &str, image: &Path) -> Result<()> {
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_string());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", Part::bytes(bytes).file_name(file_name));
        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response, "sendPhoto").await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;
        Self::check(response, "sendMessage").await
    }
}

impl DeliveryChannel for TelegramChannel {
    #[instrument(level = "info", skip(self, text), fields(chars = text.chars().count()))]
    async fn send_post(&self, destination: &str, text: &str, image: Option<&Path>) -> Result<()> {
        let escaped = html_escape::encode_text(text);
        if let Some(image) = image {
            match self.send_photo(destination, &escaped, image).await {
                Ok(()) => {
                    info!("Sent post with image");
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "Photo post refused; sending text only"),
            }
        }
        self.send_message(destination, &escaped).await?;
        info!("Sent text post");
        Ok(())
    }
}

/// Logs posts instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunChannel;

impl DeliveryChannel for DryRunChannel {
    async fn send_post(&self, destination: &str, text: &str, image: Option<&Path>) -> Result<()> {
        info!(
            %destination,
            image = image.map(|p| p.display().to_string()).unwrap_or_default(),
            text = %truncate_for_log(text, 400),
            "Dry run: post not sent"
        );
        Ok(())
    }
}

/// Channel chosen at startup.
#[derive(Debug, Clone)]
pub enum Channel {
    Telegram(TelegramChannel),
    DryRun(DryRunChannel),
}

impl DeliveryChannel for Channel {
    async fn send_post(&self, destination: &str, text: &str, image: Option<&Path>) -> Result<()> {
        match self {
            Channel::Telegram(c) => c.send_post(destination, text, image).await,
            Channel::DryRun(c) => c.send_post(destination, text, image).await,
        }
    }
}
