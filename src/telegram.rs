use crate::config::TelegramConfig;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
    #[error("failed to build telegram HTTP client: {0}")]
    Client(String),
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat: Recipient,
}

impl TelegramNotifier {
    pub fn new(token: String, chat: &str) -> Result<Self, TelegramError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| TelegramError::Client(err.to_string()))?;
        Ok(Self {
            bot: Bot::with_client(token, client),
            chat: parse_recipient(chat),
        })
    }

    pub async fn send_html(&self, text: &str) -> Result<(), TelegramError> {
        self.bot
            .send_message(self.chat.clone(), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await?;
        Ok(())
    }
}

/// Numeric ids address chats directly, anything else is treated as a
/// public channel username.
pub fn parse_recipient(chat: &str) -> Recipient {
    let chat = chat.trim();
    match chat.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if chat.starts_with('@') => Recipient::ChannelUsername(chat.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{chat}")),
    }
}

/// Token and chat id to use, or `Err` with the reason Telegram stays off.
/// The token comes from `cli_token`, then the `bot_token_env` variable, then
/// the config file.
pub fn resolve_credentials(
    cfg: &TelegramConfig,
    cli_token: Option<&str>,
) -> Result<(String, String), String> {
    resolve_credentials_with(cfg, cli_token, |name| std::env::var(name).ok())
}

fn resolve_credentials_with(
    cfg: &TelegramConfig,
    cli_token: Option<&str>,
    getenv: impl Fn(&str) -> Option<String>,
) -> Result<(String, String), String> {
    if !cfg.enabled {
        return Err("disabled in configuration".to_string());
    }
    let cli_token = cli_token.map(str::trim).filter(|v| !v.is_empty());
    let env_token = getenv(&cfg.bot_token_env)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let cfg_token = cfg
        .bot_token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let Some(token) = cli_token.map(str::to_string).or(env_token).or(cfg_token) else {
        return Err(format!(
            "missing token: pass --telegram-token, set '{}' or telegram.bot_token",
            cfg.bot_token_env
        ));
    };
    let Some(chat_id) = cfg.chat_id.clone().filter(|c| !c.trim().is_empty()) else {
        return Err("missing chat id".to_string());
    };
    Ok((token, chat_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with(token: Option<&str>, chat: Option<&str>) -> TelegramConfig {
        TelegramConfig {
            bot_token: token.map(str::to_string),
            chat_id: chat.map(str::to_string),
            bot_token_env: "TEST_TOKEN_ENV".to_string(),
            ..TelegramConfig::default()
        }
    }

    #[test]
    fn recipient_parsing() {
        assert_eq!(parse_recipient("-100123"), Recipient::Id(ChatId(-100123)));
        assert_eq!(
            parse_recipient(" @alerts "),
            Recipient::ChannelUsername("@alerts".to_string())
        );
        assert_eq!(
            parse_recipient("alerts"),
            Recipient::ChannelUsername("@alerts".to_string())
        );
    }

    #[test]
    fn env_token_wins_over_config() {
        let cfg = cfg_with(Some("from-config"), Some("42"));
        let creds = resolve_credentials_with(&cfg, None, |name| {
            (name == "TEST_TOKEN_ENV").then(|| "from-env".to_string())
        });
        assert_eq!(creds, Ok(("from-env".to_string(), "42".to_string())));
    }

    #[test]
    fn blank_env_falls_back_to_config_token() {
        let cfg = cfg_with(Some(" from-config "), Some("42"));
        let creds = resolve_credentials_with(&cfg, None, |_| Some("   ".to_string()));
        assert_eq!(creds, Ok(("from-config".to_string(), "42".to_string())));
    }

    #[test]
    fn command_line_token_wins_over_env_and_config() {
        let cfg = cfg_with(Some("from-config"), Some("42"));
        let creds = resolve_credentials_with(&cfg, Some(" from-cli "), |_| {
            Some("from-env".to_string())
        });
        assert_eq!(creds, Ok(("from-cli".to_string(), "42".to_string())));

        let blank = resolve_credentials_with(&cfg, Some(""), |_| None);
        assert_eq!(blank, Ok(("from-config".to_string(), "42".to_string())));
    }

    #[test]
    fn missing_pieces_disable_telegram() {
        let no_token = cfg_with(None, Some("42"));
        assert!(resolve_credentials_with(&no_token, None, |_| None).is_err());

        let no_chat = cfg_with(Some("t"), None);
        assert!(resolve_credentials_with(&no_chat, None, |_| None).is_err());

        let mut off = cfg_with(Some("t"), Some("42"));
        off.enabled = false;
        assert!(resolve_credentials_with(&off, Some("cli"), |_| None).is_err());
    }
}
