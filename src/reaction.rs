//! Random-emoji reactions, delivered through the raw Bot API endpoint.
//!
//! Reactions go over a plain `setMessageReaction` POST instead of the
//! framework client so the HTTP status code is available for per-connection
//! failure accounting.

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use serde::Serialize;
use teloxide::types::{ChatId, MessageId};
use tracing::{debug, error, info, warn};

use crate::state::{AppState, BotConnection, FAILURE_ALERT_THRESHOLD};

/// The reaction emoji palette Telegram accepts for bot reactions.
pub const EMOJIS: [&str; 72] = [
    "❤️", "👍", "🔥", "🥰", "👏", "😁", "🤔", "🤯", "😱", "🤬", "😢", "🎉",
    "🤩", "🤮", "💩", "🙏", "👌", "🕊️", "🤡", "🥱", "🥴", "😍", "🐳", "❤️‍🔥",
    "🌚", "🌭", "💯", "🤣", "⚡", "🍌", "🏆", "💔", "🤨", "😐", "🍓", "🍾",
    "💋", "🖕", "😈", "😴", "😭", "🤓", "👻", "👨‍💻", "👀", "🎃", "🙈", "😇",
    "😨", "🤝", "✍️", "🤗", "🫡", "🎅", "🎄", "☃️", "💅", "🤪", "🗿", "🆒",
    "💘", "🙉", "🦄", "😘", "💊", "🙊", "😎", "👾", "🤷‍♂️", "🤷", "🤷‍♀️", "😡",
];

pub fn random_emoji() -> &'static str {
    EMOJIS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("👍")
}

#[derive(Debug, Serialize)]
struct SetReactionRequest<'a> {
    chat_id: i64,
    message_id: i32,
    reaction: [ReactionEmoji<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ReactionEmoji<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    emoji: &'a str,
}

pub struct ReactionClient {
    client: reqwest::Client,
}

impl ReactionClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Submit one `setMessageReaction` call; returns the raw HTTP status so
    /// the caller can account for failures.
    pub async fn set_reaction(
        &self,
        token: &str,
        chat: ChatId,
        message: MessageId,
        emoji: &str,
    ) -> Result<StatusCode> {
        let request = SetReactionRequest {
            chat_id: chat.0,
            message_id: message.0,
            reaction: [ReactionEmoji {
                kind: "emoji",
                emoji,
            }],
        };

        let url = format!("https://api.telegram.org/bot{token}/setMessageReaction");

        debug!(
            "Submitting reaction {} for message {} in chat {}",
            emoji, message.0, chat.0
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send setMessageReaction request")?;

        Ok(response.status())
    }
}

/// Pick a random emoji and react to one message through one connection.
///
/// Best-effort: a failed reaction is counted against the connection and
/// dropped, never retried. A failed audit write is logged and the reaction
/// still counts as delivered.
pub async fn react_to_message(
    state: &AppState,
    connection: &BotConnection,
    chat: ChatId,
    message: MessageId,
) {
    let emoji = random_emoji();

    let delivered = match state
        .reactions
        .set_reaction(connection.bot.token(), chat, message, emoji)
        .await
    {
        Ok(status) if status.is_success() => true,
        Ok(status) => {
            warn!(
                "Reaction to message {} in chat {} failed: HTTP {}",
                message.0, chat.0, status
            );
            false
        }
        Err(e) => {
            warn!(
                "Reaction request for message {} in chat {} failed: {:#}",
                message.0, chat.0, e
            );
            false
        }
    };

    if delivered {
        info!("Reacted to message {} in chat {} with {}", message.0, chat.0, emoji);
        if let Err(e) = state.audit.record(chat, message, emoji).await {
            error!("Failed to record reaction: {:#}", e);
        }
    } else if state.failures.record_failure(&connection.username) {
        error!(
            "Connection @{} has reached {} delivery failures",
            connection.username, FAILURE_ALERT_THRESHOLD
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_emoji_comes_from_the_palette() {
        for _ in 0..50 {
            assert!(EMOJIS.contains(&random_emoji()));
        }
    }

    #[test]
    fn test_reaction_request_matches_the_wire_format() {
        let request = SetReactionRequest {
            chat_id: -100123,
            message_id: 7,
            reaction: [ReactionEmoji {
                kind: "emoji",
                emoji: "🎉",
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "chat_id": -100123,
                "message_id": 7,
                "reaction": [{"type": "emoji", "emoji": "🎉"}],
            })
        );
    }
}
