//! Command parsing and the onboarding content (texts, images, keyboards).

use rand::seq::SliceRandom;
use reqwest::Url;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::config::LinksConfig;

/// Recognized slash commands. Anything else is treated as an ordinary
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Begin,
    End,
    Ping,
    Broadcast,
    CancelBroadcast,
}

impl Command {
    /// Parses the first token of a message: `/begin`, `/begin@SomeBot` and
    /// `/begin args` all resolve to [`Command::Begin`].
    pub fn parse(text: &str) -> Option<Command> {
        let first = text.split_whitespace().next()?;
        let command = first.strip_prefix('/')?;
        let command = match command.split_once('@') {
            Some((name, _bot)) => name,
            None => command,
        };
        match command {
            "start" => Some(Command::Start),
            "begin" => Some(Command::Begin),
            "end" => Some(Command::End),
            "ping" => Some(Command::Ping),
            "broadcast" => Some(Command::Broadcast),
            "cancelbroadcast" => Some(Command::CancelBroadcast),
            _ => None,
        }
    }
}

/// Images attached to welcome and confirmation messages, picked at random.
pub const WELCOME_IMAGES: [&str; 40] = [
    "https://ik.imagekit.io/asadofc/Images1.png",
    "https://ik.imagekit.io/asadofc/Images2.png",
    "https://ik.imagekit.io/asadofc/Images3.png",
    "https://ik.imagekit.io/asadofc/Images4.png",
    "https://ik.imagekit.io/asadofc/Images5.png",
    "https://ik.imagekit.io/asadofc/Images6.png",
    "https://ik.imagekit.io/asadofc/Images7.png",
    "https://ik.imagekit.io/asadofc/Images8.png",
    "https://ik.imagekit.io/asadofc/Images9.png",
    "https://ik.imagekit.io/asadofc/Images10.png",
    "https://ik.imagekit.io/asadofc/Images11.png",
    "https://ik.imagekit.io/asadofc/Images12.png",
    "https://ik.imagekit.io/asadofc/Images13.png",
    "https://ik.imagekit.io/asadofc/Images14.png",
    "https://ik.imagekit.io/asadofc/Images15.png",
    "https://ik.imagekit.io/asadofc/Images16.png",
    "https://ik.imagekit.io/asadofc/Images17.png",
    "https://ik.imagekit.io/asadofc/Images18.png",
    "https://ik.imagekit.io/asadofc/Images19.png",
    "https://ik.imagekit.io/asadofc/Images20.png",
    "https://ik.imagekit.io/asadofc/Images21.png",
    "https://ik.imagekit.io/asadofc/Images22.png",
    "https://ik.imagekit.io/asadofc/Images23.png",
    "https://ik.imagekit.io/asadofc/Images24.png",
    "https://ik.imagekit.io/asadofc/Images25.png",
    "https://ik.imagekit.io/asadofc/Images26.png",
    "https://ik.imagekit.io/asadofc/Images27.png",
    "https://ik.imagekit.io/asadofc/Images28.png",
    "https://ik.imagekit.io/asadofc/Images29.png",
    "https://ik.imagekit.io/asadofc/Images30.png",
    "https://ik.imagekit.io/asadofc/Images31.png",
    "https://ik.imagekit.io/asadofc/Images32.png",
    "https://ik.imagekit.io/asadofc/Images33.png",
    "https://ik.imagekit.io/asadofc/Images34.png",
    "https://ik.imagekit.io/asadofc/Images35.png",
    "https://ik.imagekit.io/asadofc/Images36.png",
    "https://ik.imagekit.io/asadofc/Images37.png",
    "https://ik.imagekit.io/asadofc/Images38.png",
    "https://ik.imagekit.io/asadofc/Images39.png",
    "https://ik.imagekit.io/asadofc/Images40.png",
];

pub fn random_welcome_image() -> &'static str {
    WELCOME_IMAGES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(WELCOME_IMAGES[0])
}

pub const GROUP_WELCOME_TEXT: &str = "❤️ Hello Everyone! I'm <b>ReactionBot</b>!\n\n\
     I'm here to make your group more fun with automatic emoji reactions! ✨\n\n\
     📋 <b>Group Commands:</b>\n\
     • /begin - Start reactions\n\
     • /end - Stop reactions\n\
     • /ping - Check my response time\n\n\
     <i>Ready to bring some life to your conversations! 💞</i>";

pub const PRIVATE_WELCOME_TEXT: &str = "👋 Hey there! I'm <b>ReactionBot</b>.\n\n\
     I automatically react to messages in your group with fun and random emojis like ❤️🔥🎉👌.\n\n\
     Just add me to your group and enjoy the reactions!\n\n\
     <i>P.S. I work best when I have a little admin magic 😉</i>";

pub const BEGIN_CONFIRMATION: &str = "💖 Reactions Started! 💖\n\n\
     I'm now actively reacting to messages in this group with fun emojis! ✨\n\n\
     Use /end to stop reactions anytime.\n\n\
     <i>Let's make this chat more lively! 💞</i>";

pub const END_CONFIRMATION: &str = "👋 Reactions Stopped! 👋\n\n\
     I've stopped reacting to messages in this group.\n\n\
     Use /begin to start reactions again! ✨";

pub const GROUP_ONLY_HINT: &str = "❌ This command only works in groups!";

pub const BROADCAST_ARMED_TEXT: &str = "🚀 <b>Broadcast Mode Activated!</b> 🚀\n\n\
     Send any content now and I'll forward it via ALL bots to all subscribers.\n\n\
     To cancel, send /cancelbroadcast";

pub const BROADCAST_CANCELLED_TEXT: &str = "🛑 <b>Broadcast Mode Deactivated.</b>";

/// "Updates" / "Support" row shown under group-facing messages.
pub fn links_keyboard(links: &LinksConfig) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([links_row(links)])
}

/// Private chats get an extra row inviting the bot into a group.
pub fn private_links_keyboard(links: &LinksConfig, bot_username: &str) -> InlineKeyboardMarkup {
    let invite = format!("https://t.me/{bot_username}?startgroup=true");
    let mut rows = vec![links_row(links)];
    if let Some(button) = url_button("Add Me To Your Group", &invite) {
        rows.push(vec![button]);
    }
    InlineKeyboardMarkup::new(rows)
}

fn links_row(links: &LinksConfig) -> Vec<InlineKeyboardButton> {
    [
        url_button("Updates", &links.channel_url),
        url_button("Support", &links.group_url),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// URLs are validated at config load; a parse failure here just drops the
// button rather than failing the send.
fn url_button(label: &str, url: &str) -> Option<InlineKeyboardButton> {
    let url = Url::parse(url).ok()?;
    Some(InlineKeyboardButton::url(label.to_string(), url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links() -> LinksConfig {
        LinksConfig {
            channel_url: "https://t.me/my_channel".to_string(),
            group_url: "https://t.me/my_group".to_string(),
        }
    }

    #[test]
    fn test_parses_bare_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/begin"), Some(Command::Begin));
        assert_eq!(Command::parse("/end"), Some(Command::End));
        assert_eq!(Command::parse("/ping"), Some(Command::Ping));
        assert_eq!(Command::parse("/broadcast"), Some(Command::Broadcast));
        assert_eq!(
            Command::parse("/cancelbroadcast"),
            Some(Command::CancelBroadcast)
        );
    }

    #[test]
    fn test_parses_commands_with_bot_suffix_and_arguments() {
        assert_eq!(Command::parse("/begin@SomeBot"), Some(Command::Begin));
        assert_eq!(Command::parse("/ping now please"), Some(Command::Ping));
        assert_eq!(Command::parse("/end@SomeBot extra"), Some(Command::End));
    }

    #[test]
    fn test_rejects_non_commands() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("/"), None);
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse("start"), None);
    }

    #[test]
    fn test_group_keyboard_has_one_row_with_both_links() {
        let keyboard = links_keyboard(&links());
        assert_eq!(keyboard.inline_keyboard.len(), 1);
        assert_eq!(keyboard.inline_keyboard[0].len(), 2);
    }

    #[test]
    fn test_private_keyboard_adds_invite_row() {
        let keyboard = private_links_keyboard(&links(), "ReactionBot");
        assert_eq!(keyboard.inline_keyboard.len(), 2);
        assert_eq!(keyboard.inline_keyboard[1].len(), 1);
    }

    #[test]
    fn test_invalid_link_drops_the_button() {
        let broken = LinksConfig {
            channel_url: "not a url".to_string(),
            group_url: "https://t.me/my_group".to_string(),
        };
        let keyboard = links_keyboard(&broken);
        assert_eq!(keyboard.inline_keyboard[0].len(), 1);
    }

    #[test]
    fn test_random_image_comes_from_the_palette() {
        for _ in 0..20 {
            assert!(WELCOME_IMAGES.contains(&random_welcome_image()));
        }
    }
}
