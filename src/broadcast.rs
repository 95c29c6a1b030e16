use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId};
use tracing::{debug, warn};

use crate::state::BotConnection;

/// What the armed operator message turns into for fan-out. Plain text and
/// photos are re-sent natively; anything else is copied verbatim from the
/// source chat.
#[derive(Debug, Clone)]
pub enum BroadcastPayload {
    Text(String),
    Photo {
        file_id: FileId,
        caption: Option<String>,
    },
    Copy {
        from_chat: ChatId,
        message_id: MessageId,
    },
}

impl BroadcastPayload {
    pub fn from_message(msg: &Message) -> Self {
        if let Some(text) = msg.text() {
            return BroadcastPayload::Text(text.to_string());
        }
        if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
            // Telegram lists photo sizes smallest first; the last is the
            // original resolution.
            return BroadcastPayload::Photo {
                file_id: largest.file.id.clone(),
                caption: msg.caption().map(|caption| caption.to_string()),
            };
        }
        BroadcastPayload::Copy {
            from_chat: msg.chat.id,
            message_id: msg.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastPayload::Text(_) => "text",
            BroadcastPayload::Photo { .. } => "photo",
            BroadcastPayload::Copy { .. } => "copy",
        }
    }
}

/// Delivery seam between the fan-out accounting and the platform client.
/// `Send + Sync` so a `&dyn Outbound` fan-out can run inside spawned
/// handler tasks.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn deliver(
        &self,
        connection: &BotConnection,
        recipient: ChatId,
        payload: &BroadcastPayload,
    ) -> Result<()>;
}

/// Production delivery through the Telegram client.
pub struct TelegramOutbound;

#[async_trait]
impl Outbound for TelegramOutbound {
    async fn deliver(
        &self,
        connection: &BotConnection,
        recipient: ChatId,
        payload: &BroadcastPayload,
    ) -> Result<()> {
        match payload {
            BroadcastPayload::Text(text) => {
                connection
                    .bot
                    .send_message(recipient, text.clone())
                    .await
                    .context("send_message failed")?;
            }
            BroadcastPayload::Photo { file_id, caption } => {
                let mut request = connection
                    .bot
                    .send_photo(recipient, InputFile::file_id(file_id.clone()));
                if let Some(caption) = caption {
                    request = request.caption(caption.clone());
                }
                request.await.context("send_photo failed")?;
            }
            BroadcastPayload::Copy {
                from_chat,
                message_id,
            } => {
                connection
                    .bot
                    .copy_message(recipient, *from_chat, *message_id)
                    .await
                    .context("copy_message failed")?;
            }
        }
        Ok(())
    }
}

/// Aggregate result of one fan-out pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    pub connections: usize,
    pub recipients: usize,
}

impl BroadcastReport {
    pub fn attempts(&self) -> usize {
        self.delivered + self.failed
    }

    /// Operator-facing summary, HTML.
    pub fn summary(&self) -> String {
        format!(
            "📊 <b>Broadcast Complete!</b>\n\n\
             ✅ Successful: {}\n\
             ❌ Failed: {}\n\
             🤖 Total Bots: {}\n\
             👥 Total Subscribers: {}",
            self.delivered, self.failed, self.connections, self.recipients
        )
    }
}

/// Send one payload through every connection to every recipient, counting
/// each (connection, recipient) pair independently. Best-effort: a failed
/// pair is logged and counted, never retried, and never stops the
/// remaining pairs.
pub async fn run_broadcast(
    outbound: &dyn Outbound,
    connections: &[BotConnection],
    recipients: &[ChatId],
    payload: &BroadcastPayload,
) -> BroadcastReport {
    let mut delivered = 0;
    let mut failed = 0;

    for connection in connections {
        for &recipient in recipients {
            match outbound.deliver(connection, recipient, payload).await {
                Ok(()) => {
                    debug!(
                        "Delivered {} broadcast via @{} to chat {}",
                        payload.kind(),
                        connection.username,
                        recipient.0
                    );
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        "Broadcast via @{} to chat {} failed: {:#}",
                        connection.username, recipient.0, e
                    );
                    failed += 1;
                }
            }
        }
    }

    BroadcastReport {
        delivered,
        failed,
        connections: connections.len(),
        recipients: recipients.len(),
    }
}
