use std::env;

use chatcmd_core::{errors::Error, Result};

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Numeric user ids allowed to talk to the bot; empty allows everyone.
    pub allowed_users: Vec<i64>,
}

impl TelegramConfig {
    /// Reads `TELEGRAM_BOT_TOKEN` (required) and `TELEGRAM_ALLOWED_USERS`.
    ///
    /// Call after `EngineConfig::load` so a `.env` file has been applied.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is required".to_string()))?;

        let allowed_users = parse_i64_csv(lookup("TELEGRAM_ALLOWED_USERS"))?;

        Ok(Self {
            bot_token,
            allowed_users,
        })
    }
}

fn parse_i64_csv(v: Option<String>) -> Result<Vec<i64>> {
    let Some(v) = v else {
        return Ok(Vec::new());
    };
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                Error::Config(format!("TELEGRAM_ALLOWED_USERS has a non-numeric id: {s}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_required() {
        assert!(TelegramConfig::from_lookup(|_| None).is_err());
        assert!(TelegramConfig::from_lookup(|_| Some("  ".to_string())).is_err());
    }

    #[test]
    fn parses_allowed_users() {
        let cfg = TelegramConfig::from_lookup(|k| match k {
            "TELEGRAM_BOT_TOKEN" => Some("123:abc".to_string()),
            "TELEGRAM_ALLOWED_USERS" => Some("42, 7,".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.bot_token, "123:abc");
        assert_eq!(cfg.allowed_users, vec![42, 7]);

        let bad = TelegramConfig::from_lookup(|k| match k {
            "TELEGRAM_BOT_TOKEN" => Some("t".to_string()),
            "TELEGRAM_ALLOWED_USERS" => Some("ann".to_string()),
            _ => None,
        });
        assert!(bad.is_err());
    }
}
