//! Per-connection update loop and the shared message pipeline.
//!
//! Each configured token gets one loop that establishes the session,
//! registers the connection in the pool, and long-polls for updates. Every
//! inbound message is handled on its own task so one slow handler (for
//! example a full broadcast fan-out) never stalls ingestion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, BotCommand, InlineKeyboardMarkup, InputFile, LinkPreviewOptions, ParseMode,
    ReplyParameters, UpdateKind,
};
use teloxide::utils::markdown;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{self, BroadcastPayload, TelegramOutbound};
use crate::commands::{self, Command};
use crate::reaction;
use crate::state::{AppState, BotConnection};

/// Seconds Telegram holds a getUpdates long poll open.
const POLL_TIMEOUT_SECS: u32 = 20;
/// Pause before retrying after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Run one bot connection until the shutdown token flips. An establishment
/// failure is fatal for this connection only; sibling connections keep
/// running.
pub async fn run_connection(
    state: Arc<AppState>,
    token: String,
    shutdown: CancellationToken,
) -> Result<()> {
    let bot = Bot::new(&token);

    let me = bot
        .get_me()
        .await
        .context("Failed to establish bot session")?;
    let connection = BotConnection {
        bot: bot.clone(),
        user_id: me.user.id.0,
        username: me.username().to_string(),
    };

    state.pool.register(connection.clone());
    info!(
        "Bot connected: @{} [{}] ({} in pool)",
        connection.username,
        connection.user_id,
        state.pool.len()
    );

    // The broadcast pair stays unadvertised; /ping works unlisted.
    if let Err(e) = bot
        .set_my_commands(vec![
            BotCommand::new("start", "Show welcome message"),
            BotCommand::new("begin", "Start reactions in group"),
            BotCommand::new("end", "Stop reactions in group"),
        ])
        .await
    {
        warn!(
            "Failed to publish command menu for @{}: {}",
            connection.username, e
        );
    }

    let mut offset: i32 = 0;
    info!("Polling updates for @{}", connection.username);

    loop {
        let poll = bot
            .get_updates()
            .offset(offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates([AllowedUpdate::Message]);

        let updates = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stopping update loop for @{}", connection.username);
                return Ok(());
            }
            result = poll.send() => match result {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("getUpdates failed for @{}: {}", connection.username, e);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            },
        };

        for update in updates {
            offset = update.id.0 as i32 + 1;
            if let UpdateKind::Message(message) = update.kind {
                let task_state = Arc::clone(&state);
                let connection = connection.clone();
                state.handlers.spawn(async move {
                    handle_message(task_state, connection, message).await;
                });
            }
        }
    }
}

/// Entry point for one inbound message. Records the chat as a broadcast
/// recipient, then runs the command/reaction pipeline; errors are logged
/// here because spawned handlers have no caller to propagate to.
async fn handle_message(state: Arc<AppState>, connection: BotConnection, msg: Message) {
    let principal = match &msg.from {
        Some(user) => user.id.0,
        None => {
            debug!("Skipping message {} without a sender", msg.id.0);
            return;
        }
    };

    if let Some(text) = msg.text() {
        debug!(
            "Message from {} in chat {} via @{}: {}",
            principal, msg.chat.id.0, connection.username, text
        );
    }

    if state.recipients.record(msg.chat.id) {
        info!(
            "New recipient recorded: chat {} ({} total)",
            msg.chat.id.0,
            state.recipients.len()
        );
    }

    if let Err(e) = dispatch(&state, &connection, &msg, principal).await {
        error!("Handler error for chat {}: {:#}", msg.chat.id.0, e);
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    connection: &BotConnection,
    msg: &Message,
    principal: u64,
) -> Result<()> {
    let command = msg.text().and_then(Command::parse);

    // Gate transitions come before payload consumption so the control
    // commands themselves are never broadcast. A non-trusted sender fails
    // the arm/disarm check and falls through to ordinary handling.
    if command == Some(Command::Broadcast) && state.gate.arm(principal) {
        info!(
            "Broadcast armed by {} via @{}",
            principal, connection.username
        );
        connection
            .bot
            .send_message(msg.chat.id, commands::BROADCAST_ARMED_TEXT)
            .parse_mode(ParseMode::Html)
            .await
            .context("Failed to send broadcast guide")?;
        return Ok(());
    }

    if command == Some(Command::CancelBroadcast) && state.gate.disarm(principal) {
        info!(
            "Broadcast disarmed by {} via @{}",
            principal, connection.username
        );
        connection
            .bot
            .send_message(msg.chat.id, commands::BROADCAST_CANCELLED_TEXT)
            .parse_mode(ParseMode::Html)
            .await
            .context("Failed to confirm broadcast cancel")?;
        return Ok(());
    }

    if state.gate.consume(principal) {
        return run_operator_broadcast(state, connection, msg).await;
    }

    match command {
        Some(Command::Begin) => handle_begin(state, connection, msg).await,
        Some(Command::End) => handle_end(state, connection, msg).await,
        Some(Command::Start) => handle_start(state, connection, msg).await,
        Some(Command::Ping) => handle_ping(state, connection, msg).await,
        _ => handle_ordinary(state, connection, msg).await,
    }
}

/// The armed message becomes the payload: fan it out through every pooled
/// connection to every recorded recipient, then report the counts back to
/// the operator through the connection that observed the payload.
async fn run_operator_broadcast(
    state: &Arc<AppState>,
    connection: &BotConnection,
    msg: &Message,
) -> Result<()> {
    let payload = BroadcastPayload::from_message(msg);
    let connections = state.pool.snapshot();
    let recipients = state.recipients.all();

    info!(
        "Broadcasting {} payload via {} connections to {} recipients",
        payload.kind(),
        connections.len(),
        recipients.len()
    );

    let report =
        broadcast::run_broadcast(&TelegramOutbound, &connections, &recipients, &payload).await;

    info!(
        "Broadcast complete: {} delivered, {} failed",
        report.delivered, report.failed
    );

    connection
        .bot
        .send_message(msg.chat.id, report.summary())
        .parse_mode(ParseMode::Html)
        .await
        .context("Failed to send broadcast summary")?;

    Ok(())
}

async fn handle_begin(
    state: &Arc<AppState>,
    connection: &BotConnection,
    msg: &Message,
) -> Result<()> {
    if !is_group_chat(msg) {
        connection
            .bot
            .send_message(msg.chat.id, commands::GROUP_ONLY_HINT)
            .await
            .context("Failed to send group-only hint")?;
        return Ok(());
    }

    state.toggles.set_enabled(msg.chat.id, true);
    info!("Reactions enabled for chat {}", msg.chat.id.0);

    spawn_reaction(state, connection, msg);

    send_photo_or_text(
        connection,
        msg.chat.id,
        commands::BEGIN_CONFIRMATION,
        commands::links_keyboard(&state.config.links),
    )
    .await
}

async fn handle_end(
    state: &Arc<AppState>,
    connection: &BotConnection,
    msg: &Message,
) -> Result<()> {
    if !is_group_chat(msg) {
        connection
            .bot
            .send_message(msg.chat.id, commands::GROUP_ONLY_HINT)
            .await
            .context("Failed to send group-only hint")?;
        return Ok(());
    }

    state.toggles.set_enabled(msg.chat.id, false);
    info!("Reactions disabled for chat {}", msg.chat.id.0);

    connection
        .bot
        .send_message(msg.chat.id, commands::END_CONFIRMATION)
        .parse_mode(ParseMode::Html)
        .await
        .context("Failed to confirm reaction stop")?;

    Ok(())
}

async fn handle_start(
    state: &Arc<AppState>,
    connection: &BotConnection,
    msg: &Message,
) -> Result<()> {
    if is_group_chat(msg) {
        send_photo_or_text(
            connection,
            msg.chat.id,
            commands::GROUP_WELCOME_TEXT,
            commands::links_keyboard(&state.config.links),
        )
        .await
    } else {
        spawn_reaction(state, connection, msg);
        let keyboard = commands::private_links_keyboard(&state.config.links, &connection.username);
        send_photo_or_text(connection, msg.chat.id, commands::PRIVATE_WELCOME_TEXT, keyboard).await
    }
}

/// Measures the send round-trip, then edits the sent message into the
/// latency reply.
async fn handle_ping(
    state: &Arc<AppState>,
    connection: &BotConnection,
    msg: &Message,
) -> Result<()> {
    if should_react(state, msg) {
        spawn_reaction(state, connection, msg);
    }

    let started = Instant::now();

    let mut request = connection.bot.send_message(msg.chat.id, "🛰️ Pinging...");
    if is_group_chat(msg) {
        request = request.reply_parameters(ReplyParameters::new(msg.id));
    }
    let sent = request.await.context("Failed to send ping message")?;

    let latency = format!("{:.2}ms", started.elapsed().as_secs_f64() * 1000.0);
    let text = format!(
        "🏓 {} {}",
        markdown::link(&state.config.links.channel_url, &markdown::escape("Pong!")),
        markdown::escape(&latency),
    );

    connection
        .bot
        .edit_message_text(sent.chat.id, sent.id, text)
        .parse_mode(ParseMode::MarkdownV2)
        .link_preview_options(LinkPreviewOptions {
            is_disabled: true,
            url: None,
            prefer_small_media: false,
            prefer_large_media: false,
            show_above_text: false,
        })
        .await
        .context("Failed to edit ping message")?;

    info!("Ping answered in {} for chat {}", latency, msg.chat.id.0);
    Ok(())
}

async fn handle_ordinary(
    state: &Arc<AppState>,
    connection: &BotConnection,
    msg: &Message,
) -> Result<()> {
    if !should_react(state, msg) {
        debug!(
            "Skipping reaction for chat {} (reactions disabled)",
            msg.chat.id.0
        );
        return Ok(());
    }
    reaction::react_to_message(state, connection, msg.chat.id, msg.id).await;
    Ok(())
}

/// Private chats always react; group chats react unless toggled off.
fn should_react(state: &AppState, msg: &Message) -> bool {
    !is_group_chat(msg) || state.toggles.is_enabled(msg.chat.id)
}

fn is_group_chat(msg: &Message) -> bool {
    msg.chat.is_group() || msg.chat.is_supergroup()
}

/// Command handlers react concurrently so the confirmation reply is not
/// held up by the reaction round-trip. The task goes through the shared
/// tracker, so shutdown waits for it like any other handler.
fn spawn_reaction(state: &Arc<AppState>, connection: &BotConnection, msg: &Message) {
    let task_state = Arc::clone(state);
    let connection = connection.clone();
    let (chat, message) = (msg.chat.id, msg.id);
    state.handlers.spawn(async move {
        reaction::react_to_message(&task_state, &connection, chat, message).await;
    });
}

/// Send a random welcome image with an HTML caption; if the photo send is
/// rejected, resend the caption as a plain message with the same keyboard.
async fn send_photo_or_text(
    connection: &BotConnection,
    chat: ChatId,
    text: &str,
    keyboard: InlineKeyboardMarkup,
) -> Result<()> {
    let image = commands::random_welcome_image();

    let photo_result = match Url::parse(image) {
        Ok(url) => connection
            .bot
            .send_photo(chat, InputFile::url(url))
            .caption(text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard.clone())
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from),
        Err(e) => Err(anyhow::Error::from(e)),
    };

    if let Err(e) = photo_result {
        warn!(
            "Photo send to chat {} failed, falling back to text: {:#}",
            chat.0, e
        );
        connection
            .bot
            .send_message(chat, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await
            .context("Failed to send text fallback")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ReactionLog;
    use crate::config::Config;

    fn test_state() -> AppState {
        let config = Config::parse(
            r#"
                [telegram]
                bot_tokens = ["111:AAA"]
                owner_id = 42
            "#,
        )
        .unwrap();
        AppState::new(config, ReactionLog::open_in_memory().unwrap())
    }

    fn test_connection() -> BotConnection {
        BotConnection {
            bot: Bot::new("123456:TEST"),
            user_id: 1,
            username: "ReactionBot".to_string(),
        }
    }

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    fn group_message(chat_id: i64) -> Message {
        message(serde_json::json!({
            "message_id": 1,
            "date": 1714000000,
            "chat": {"id": chat_id, "type": "supergroup", "title": "Club"},
            "from": {"id": 7, "is_bot": false, "first_name": "Member"},
            "text": "good morning"
        }))
    }

    fn private_message(chat_id: i64) -> Message {
        message(serde_json::json!({
            "message_id": 2,
            "date": 1714000000,
            "chat": {"id": chat_id, "type": "private", "first_name": "Friend"},
            "from": {"id": 7, "is_bot": false, "first_name": "Friend"},
            "text": "hi"
        }))
    }

    #[test]
    fn test_classifies_group_and_private_chats() {
        assert!(is_group_chat(&group_message(-100500)));
        assert!(!is_group_chat(&private_message(77)));

        let classic_group = message(serde_json::json!({
            "message_id": 3,
            "date": 1714000000,
            "chat": {"id": -900, "type": "group", "title": "Old Club"},
            "from": {"id": 7, "is_bot": false, "first_name": "Member"},
            "text": "hello"
        }));
        assert!(is_group_chat(&classic_group));
    }

    #[test]
    fn test_group_reactions_follow_the_toggle() {
        let state = test_state();
        let msg = group_message(-100500);

        assert!(should_react(&state, &msg));

        state.toggles.set_enabled(msg.chat.id, false);
        assert!(!should_react(&state, &msg));

        state.toggles.set_enabled(msg.chat.id, true);
        assert!(should_react(&state, &msg));
    }

    #[test]
    fn test_private_chats_always_react() {
        let state = test_state();
        let msg = private_message(77);

        state.toggles.set_enabled(msg.chat.id, false);
        assert!(should_react(&state, &msg));
    }

    #[test]
    fn test_armed_gate_consumes_the_next_trusted_message_only() {
        let state = test_state();

        assert!(state.gate.arm(42));
        assert!(!state.gate.consume(7));
        assert!(state.gate.consume(42));
        assert!(!state.gate.consume(42));
    }

    #[tokio::test]
    async fn test_command_reactions_spawn_on_the_shared_tracker() {
        let state = Arc::new(test_state());
        let connection = test_connection();
        let msg = private_message(77);

        // Single-threaded test runtime: the spawned task cannot start
        // before this function yields, so the count is race-free.
        assert_eq!(state.handlers.len(), 0);
        spawn_reaction(&state, &connection, &msg);
        assert_eq!(state.handlers.len(), 1);
    }
}
