//! Telegram chat transport
//!
//! Provides a long-polling interface to the single authorized chat.
//! Inbound text and recognized commands are translated into
//! orchestrator events and delivered through the one ordered mailbox;
//! the transport itself holds no conversation state.
//!
//! Delivery guarantees of the chat platform are assumed; a failed
//! send is logged and surfaced, not retried here.

use crate::errors::EngineError;
use crate::orchestrator::{Command, Event};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Outbound message interface the orchestrator talks to.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), EngineError>;
}

#[derive(Clone)]
pub struct TelegramBot {
    token: String,
    chat_id: i64,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Deserialize, Debug)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Deserialize, Debug)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct GetUpdatesResponse {
    ok: bool,
    result: Option<Vec<Update>>,
}

impl TelegramBot {
    pub fn new(token: String, chat_id: i64) -> Self {
        Self {
            token,
            chat_id,
            client: reqwest::Client::builder()
                // Must exceed the 30s long-poll window.
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Start the long-polling loop, translating updates into events.
    ///
    /// Blocks the current task until shutdown; spawn it.
    pub async fn run_polling(
        self,
        events: mpsc::Sender<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("starting Telegram long-polling loop");
        let mut offset = 0i64;

        loop {
            tokio::select! {
                result = self.get_updates(offset) => {
                    match result {
                        Ok(updates) => {
                            for update in updates {
                                offset = update.update_id + 1;
                                if let Some(msg) = update.message {
                                    self.handle_message(msg, &events).await;
                                }
                            }
                        }
                        Err(e) => {
                            error!("failed to fetch Telegram updates: {}", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Telegram poller shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, EngineError> {
        let url = format!(
            "https://api.telegram.org/bot{}/getUpdates?offset={}&timeout=30",
            self.token, offset
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?
            .json::<GetUpdatesResponse>()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if !response.ok {
            return Err(EngineError::Transport(
                "Telegram API returned ok=false".to_string(),
            ));
        }

        Ok(response.result.unwrap_or_default())
    }

    async fn handle_message(&self, msg: Message, events: &mpsc::Sender<Event>) {
        if msg.chat.id != self.chat_id {
            warn!(chat_id = msg.chat.id, "ignoring message from unauthorized chat");
            return;
        }

        let Some(text) = msg.text else { return };

        let event = if let Some(first) = text.split_whitespace().next() {
            if first.starts_with('/') {
                match parse_command(first) {
                    Some(command) => Event::Command(command),
                    None => {
                        let _ = self
                            .send(&format!("Unknown command: {}. Try /help.", first))
                            .await;
                        return;
                    }
                }
            } else {
                Event::Inbound(text)
            }
        } else {
            // Whitespace-only message; nothing to route.
            return;
        };

        if events.send(event).await.is_err() {
            warn!("orchestrator mailbox closed, dropping inbound message");
        }
    }
}

/// Recognize the manual commands the orchestrator understands.
fn parse_command(word: &str) -> Option<Command> {
    match word {
        "/start" => Some(Command::Start),
        "/help" => Some(Command::Help),
        "/daily" => Some(Command::Daily),
        "/weekly" => Some(Command::Weekly),
        "/status" => Some(Command::Status),
        _ => None,
    }
}

#[async_trait]
impl ChatTransport for TelegramBot {
    async fn send(&self, text: &str) -> Result<(), EngineError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        // Telegram caps messages at 4096 chars.
        let body = if text.len() > 4000 {
            let cut = text
                .char_indices()
                .take_while(|(i, _)| *i < 4000)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            format!("{}...\n\n(truncated)", &text[..cut])
        } else {
            text.to_string()
        };

        #[derive(Serialize)]
        struct SendMsgReq<'a> {
            chat_id: i64,
            text: &'a str,
        }

        let req = SendMsgReq {
            chat_id: self.chat_id,
            text: &body,
        };

        let response = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "sendMessage returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert!(matches!(parse_command("/daily"), Some(Command::Daily)));
        assert!(matches!(parse_command("/weekly"), Some(Command::Weekly)));
        assert!(matches!(parse_command("/status"), Some(Command::Status)));
        assert!(matches!(parse_command("/help"), Some(Command::Help)));
        assert!(matches!(parse_command("/start"), Some(Command::Start)));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(parse_command("/stretch").is_none());
        assert!(parse_command("/dailyx").is_none());
    }

    #[test]
    fn test_bot_creation() {
        let bot = TelegramBot::new("test-token".to_string(), 12345);
        assert_eq!(bot.chat_id, 12345);
        assert_eq!(bot.token, "test-token");
    }
}
