//! Telegram approval channel.
//!
//! Sends each request as a message with Approve / Skip inline buttons and
//! long-polls `getUpdates` for the button presses. Callback data has the
//! form `approve:<trade id>` or `skip:<trade id>`. Presses from any chat
//! other than the configured one are ignored.
//!
//! API docs: https://core.telegram.org/bots/api

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{apply_decision, render_outcome, render_request, ApprovalChannel, Decision};
use crate::engine::approvals::{ApprovalOutcome, ApprovalRequest, TradeApprovalRegistry, TradeId};
use crate::engine::executor::ExecutionGate;
use crate::types::EdgegateError;

const CHANNEL_NAME: &str = "telegram";
const API_BASE: &str = "https://api.telegram.org";

/// Pause before retrying after a failed `getUpdates`.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<CallbackMessage>,
}

#[derive(Debug, Deserialize)]
struct CallbackMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Parse inline-button callback data into a decision.
pub fn parse_callback(data: &str) -> Option<Decision> {
    let (action, id) = data.split_once(':')?;
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    match action {
        "approve" => Some(Decision::Approve(TradeId::from(id))),
        "skip" => Some(Decision::Skip(TradeId::from(id))),
        _ => None,
    }
}

fn inline_keyboard(id: &TradeId) -> Value {
    json!({
        "inline_keyboard": [[
            { "text": "Approve", "callback_data": format!("approve:{id}") },
            { "text": "Skip", "callback_data": format!("skip:{id}") },
        ]]
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TelegramChannel {
    http: Client,
    token: SecretString,
    chat_id: String,
    api_base: String,
    poll_timeout: Duration,
    /// Message carrying each request's buttons, edited once decided.
    messages: Mutex<HashMap<TradeId, i64>>,
}

impl TelegramChannel {
    pub fn new(token: SecretString, chat_id: String, poll_timeout: Duration) -> Result<Self> {
        Self::with_api_base(token, chat_id, poll_timeout, API_BASE)
    }

    pub fn with_api_base(
        token: SecretString,
        chat_id: String,
        poll_timeout: Duration,
        api_base: &str,
    ) -> Result<Self> {
        // Long polls hold the connection for `poll_timeout`.
        let http = Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .user_agent("EDGEGATE/0.1.0")
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            token,
            chat_id,
            api_base: api_base.trim_end_matches('/').to_string(),
            poll_timeout,
            messages: Mutex::new(HashMap::new()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token.expose_secret(), method)
    }

    fn alert_error(message: impl Into<String>) -> EdgegateError {
        EdgegateError::Alert {
            channel: CHANNEL_NAME.into(),
            message: message.into(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            // reqwest errors carry the URL, which contains the token.
            .map_err(|e| Self::alert_error(format!("{method} request failed: {}", e.without_url())))?;

        let status = resp.status();
        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response ({status})"))?;
        if !parsed.ok {
            let reason = parsed.description.unwrap_or_else(|| status.to_string());
            return Err(Self::alert_error(format!("{method}: {reason}")).into());
        }
        parsed
            .result
            .ok_or_else(|| Self::alert_error(format!("{method}: empty result")).into())
    }

    fn remember(&self, id: &TradeId, message_id: i64) {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone(), message_id);
    }

    fn forget(&self, id: &TradeId) -> Option<i64> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).remove(id)
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["callback_query"],
        });
        self.call("getUpdates", &body).await
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) {
        let body = json!({ "callback_query_id": callback_id, "text": text });
        if let Err(e) = self.call::<bool>("answerCallbackQuery", &body).await {
            debug!(error = %e, "answerCallbackQuery failed");
        }
    }

    fn from_configured_chat(&self, query: &CallbackQuery) -> bool {
        query
            .message
            .as_ref()
            .map(|m| m.chat.id.to_string() == self.chat_id)
            .unwrap_or(false)
    }

    /// Dispatch button presses to the registry until the task is dropped.
    pub async fn poll_loop(
        self: Arc<Self>,
        registry: Arc<TradeApprovalRegistry>,
        gate: Arc<ExecutionGate>,
    ) {
        info!(chat = %self.chat_id, "Telegram approval polling started");
        let mut offset = 0i64;
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "Telegram getUpdates failed");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(query) = update.callback_query {
                    self.handle_callback(query, &registry, &gate).await;
                }
            }
        }
    }

    async fn handle_callback(
        &self,
        query: CallbackQuery,
        registry: &TradeApprovalRegistry,
        gate: &ExecutionGate,
    ) {
        if !self.from_configured_chat(&query) {
            warn!(callback = %query.id, "Ignoring callback from unknown chat");
            return;
        }
        let Some(decision) = query.data.as_deref().and_then(parse_callback) else {
            self.answer_callback(&query.id, "Unknown action").await;
            return;
        };
        if let Some(message) = &query.message {
            self.remember(decision.trade_id(), message.message_id);
        }

        // Acknowledge first so the button stops spinning during execution.
        let ack = match &decision {
            Decision::Approve(_) => "Executing...",
            Decision::Skip(_) => "Skipped",
        };
        self.answer_callback(&query.id, ack).await;

        match apply_decision(registry, gate, &decision).await {
            Ok((request, outcome)) => {
                if let Err(e) = self.report(&request, &outcome).await {
                    warn!(id = %request.id, error = %e, "Failed to report outcome");
                }
            }
            Err(e) => {
                info!(id = %decision.trade_id(), error = %e, "Decision rejected");
                self.forget(decision.trade_id());
            }
        }
    }
}

#[async_trait]
impl ApprovalChannel for TelegramChannel {
    async fn present(&self, request: &ApprovalRequest) -> Result<()> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": render_request(request),
            "reply_markup": inline_keyboard(&request.id),
        });
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        self.remember(&request.id, sent.message_id);
        debug!(id = %request.id, message_id = sent.message_id, "Approval request sent");
        Ok(())
    }

    async fn report(&self, request: &ApprovalRequest, outcome: &ApprovalOutcome) -> Result<()> {
        let text = render_outcome(request, outcome);
        match self.forget(&request.id) {
            Some(message_id) => {
                // Editing without reply_markup removes the buttons.
                let body = json!({
                    "chat_id": self.chat_id,
                    "message_id": message_id,
                    "text": format!("{}\n\n{text}", render_request(request)),
                });
                self.call::<Value>("editMessageText", &body).await?;
            }
            None => {
                let body = json!({ "chat_id": self.chat_id, "text": text });
                self.call::<SentMessage>("sendMessage", &body).await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
