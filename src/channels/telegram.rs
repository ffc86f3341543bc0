//! Telegram channel: long-polls the Bot API for updates.
//!
//! Classifies each message into the closed [`Intent`] set, renders the named
//! keyboards as `reply_markup`, and downloads photos for the photo store.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::keyboard::{Key, Keyboard};
use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;
use crate::form::input::{Button, Intent};
use crate::form::model::SubmitterIdentity;
use crate::photos::PhotoSource;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Maximum caption length for sendDocument.
const TELEGRAM_MAX_CAPTION_LENGTH: usize = 1024;

/// Pause before polling again after a failed `getUpdates`.
const POLL_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

/// Telegram channel: connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "https://api.telegram.org/file/bot{}/{file_path}",
            self.bot_token.expose_secret()
        )
    }

    /// Send a text message, trying Markdown first with plain text fallback
    /// unless `markdown` is off. Splits long messages that exceed Telegram's
    /// 4096 char limit; the keyboard rides on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<Keyboard>,
        markdown: bool,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let markup = keyboard.as_ref().map(reply_markup);

        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { markup.as_ref() } else { None };
            if markdown {
                self.send_message_chunk(chat_id, chunk, markup).await?;
            } else {
                self.send_plain_chunk(chat_id, chunk, markup, None).await?;
            }
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markup: Option<&serde_json::Value>,
    ) -> Result<(), ChannelError> {
        let mut markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(markup) = markup {
            markdown_body["reply_markup"] = markup.clone();
        }

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );
        self.send_plain_chunk(chat_id, text, markup, Some(markdown_status))
            .await
    }

    /// Send a single chunk without `parse_mode`.
    async fn send_plain_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markup: Option<&serde_json::Value>,
        markdown_status: Option<reqwest::StatusCode>,
    ) -> Result<(), ChannelError> {
        let mut plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = markup {
            plain_body["reply_markup"] = markup.clone();
        }
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            let reason = match markdown_status {
                Some(status) => format!(
                    "sendMessage failed (markdown: {status}, plain: {plain_err})"
                ),
                None => format!("sendMessage failed: {plain_err}"),
            };
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason,
            });
        }

        Ok(())
    }

    /// Send a document from bytes (in-memory).
    pub async fn send_document_bytes(
        &self,
        chat_id: &str,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
        keyboard: Option<Keyboard>,
    ) -> anyhow::Result<()> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        if let Some(cap) = caption.filter(|c| !c.is_empty()) {
            form = form.text("caption", truncate_chars(cap, TELEGRAM_MAX_CAPTION_LENGTH));
        }
        if let Some(keyboard) = keyboard {
            form = form.text("reply_markup", reply_markup(&keyboard).to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendDocument failed: {err}");
        }

        tracing::info!("Telegram document sent to {chat_id}: {file_name}");
        Ok(())
    }

    /// Resolve a file id to its download path via `getFile`.
    async fn file_path(&self, file_id: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram getFile failed: {err}");
        }

        let data: serde_json::Value = resp.json().await?;
        data.get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(serde_json::Value::as_str)
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("Telegram getFile returned no file_path"))
    }

    async fn download(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let file_path = self.file_path(file_id).await?;
        let resp = self.client.get(self.file_url(&file_path)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Telegram file download returned {}", resp.status());
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", e.without_url());
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {}", e.without_url());
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let results = match update_batch(&data) {
                    Ok(results) => results,
                    Err(e) => {
                        tracing::warn!("Telegram poll rejected: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(message) = update.get("message") else {
                        continue;
                    };

                    let Some(incoming) = parse_message(message) else {
                        tracing::debug!("Telegram: skipping message without sender");
                        continue;
                    };

                    tracing::debug!(
                        submitter_id = incoming.submitter.id,
                        intent = %incoming.intent.describe(),
                        "Telegram message received"
                    );

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "No chat_id in message metadata".into(),
            })?;

        match response.attachment {
            Some(attachment) => self
                .send_document_bytes(
                    chat_id,
                    attachment.bytes,
                    &attachment.file_name,
                    Some(&response.content),
                    response.keyboard,
                )
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                }),
            None => {
                self.send_message(
                    chat_id,
                    &response.content,
                    response.keyboard,
                    response.markdown,
                )
                .await
            }
        }
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

#[async_trait]
impl PhotoSource for TelegramChannel {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        self.download(file_id)
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The updates in a `getUpdates` reply.
///
/// Error replies (`"ok": false`, e.g. a 401 for a revoked token or a 409 when
/// another instance is polling) are rejected with their description.
fn update_batch(data: &serde_json::Value) -> Result<&[serde_json::Value], ChannelError> {
    if data.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
        let code = data
            .get("error_code")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_default();
        let description = data
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("no description");
        return Err(ChannelError::InvalidMessage(format!(
            "getUpdates returned {code}: {description}"
        )));
    }
    data.get("result")
        .and_then(serde_json::Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| ChannelError::InvalidMessage("getUpdates reply has no result".into()))
}

/// Build an [`IncomingMessage`] from a Bot API `message` object.
///
/// Returns `None` when the message has no sender.
fn parse_message(message: &serde_json::Value) -> Option<IncomingMessage> {
    let from = message.get("from")?;
    let user_id = from.get("id").and_then(serde_json::Value::as_i64)?;
    let field = |key: &str| from.get(key).and_then(serde_json::Value::as_str);
    let submitter = SubmitterIdentity::from_parts(
        user_id,
        field("first_name"),
        field("last_name"),
        field("username"),
    );

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(user_id)
        .to_string();

    Some(
        IncomingMessage::new("telegram", submitter, classify_message(message))
            .with_metadata(serde_json::json!({ "chat_id": chat_id })),
    )
}

/// Map a Bot API message onto the closed intent set.
fn classify_message(message: &serde_json::Value) -> Intent {
    if let Some(contact) = message.get("contact") {
        let phone_number = contact
            .get("phone_number")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Intent::Contact { phone_number };
    }

    if let Some(location) = message.get("location") {
        let coord = |key: &str| location.get(key).and_then(serde_json::Value::as_f64);
        return match (coord("latitude"), coord("longitude")) {
            (Some(latitude), Some(longitude)) => Intent::Location {
                latitude,
                longitude,
            },
            _ => Intent::Unsupported("location".into()),
        };
    }

    if let Some(sizes) = message.get("photo").and_then(serde_json::Value::as_array) {
        let largest = sizes.iter().max_by_key(|size| {
            let dim = |key: &str| size.get(key).and_then(serde_json::Value::as_i64).unwrap_or(0);
            dim("width") * dim("height")
        });
        return match largest
            .and_then(|size| size.get("file_id"))
            .and_then(serde_json::Value::as_str)
        {
            Some(file_id) => Intent::Photo {
                file_id: file_id.to_string(),
            },
            None => Intent::Unsupported("photo".into()),
        };
    }

    if let Some(text) = message.get("text").and_then(serde_json::Value::as_str) {
        if is_start_command(text) {
            return Intent::Start;
        }
        if let Some(button) = Button::from_label(text) {
            return Intent::Button(button);
        }
        return Intent::Text(text.to_string());
    }

    let kind = ["document", "sticker", "voice", "video", "audio", "animation"]
        .into_iter()
        .find(|k| message.get(*k).is_some())
        .unwrap_or("message");
    Intent::Unsupported(kind.to_string())
}

/// `/start`, `/start payload`, or `/start@BotName`.
fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    command == "/start" || command.starts_with("/start@")
}

/// Render a keyboard as Telegram `reply_markup`.
fn reply_markup(keyboard: &Keyboard) -> serde_json::Value {
    if *keyboard == Keyboard::Remove {
        return serde_json::json!({ "remove_keyboard": true });
    }
    let rows: Vec<Vec<serde_json::Value>> = keyboard
        .rows()
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|key| match key {
                    Key::RequestContact => {
                        serde_json::json!({ "text": key.label(), "request_contact": true })
                    }
                    Key::RequestLocation => {
                        serde_json::json!({ "text": key.label(), "request_location": true })
                    }
                    Key::Command(_) => serde_json::json!({ "text": key.label() }),
                })
                .collect()
        })
        .collect();
    serde_json::json!({
        "keyboard": rows,
        "resize_keyboard": true,
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
