use std::{env, fs, path::Path, time::Duration};

use crate::{
    commands::{middleware::CommandRateLimit, parser::CommandParser},
    conversation::wait::{MatchPolicy, WaitDefaults},
    domain::ParticipantId,
    errors::Error,
    messaging::queue::QueueConfig,
    Result,
};

/// Typed engine configuration.
///
/// Loaded from `CHATCMD_*` environment variables (and an optional `.env`
/// file); every field has a default so an empty environment is valid.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    // Command matching
    pub prefixes: Vec<String>,
    pub case_sensitive_commands: bool,
    pub mention_char: char,

    // Delivery
    pub queue: QueueConfig,

    // Waits
    pub wait: WaitDefaults,

    // Privileged commands
    pub privileged_participants: Vec<ParticipantId>,

    // Per-sender command rate limit (0 requests disables it)
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefixes: vec!["!".to_string()],
            case_sensitive_commands: false,
            mention_char: '@',
            queue: QueueConfig::default(),
            wait: WaitDefaults::default(),
            privileged_participants: Vec::new(),
            rate_limit_requests: 20,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key/value lookup (environment, map, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let str_of = |key: &str| lookup(key).map(|s| s.trim().to_string());
        let bool_of = |key: &str| {
            str_of(key).map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        };
        let u64_of = |key: &str| -> Result<Option<u64>> {
            match str_of(key) {
                None => Ok(None),
                Some(s) if s.is_empty() => Ok(None),
                Some(s) => s
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| Error::Config(format!("{key} must be a non-negative integer"))),
            }
        };

        let prefixes = parse_csv(str_of("CHATCMD_PREFIXES")).unwrap_or(defaults.prefixes);
        let case_sensitive_commands =
            bool_of("CHATCMD_CASE_SENSITIVE").unwrap_or(defaults.case_sensitive_commands);
        let mention_char = match str_of("CHATCMD_MENTION_CHAR") {
            None => defaults.mention_char,
            Some(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(Error::Config(
                            "CHATCMD_MENTION_CHAR must be a single character".to_string(),
                        ))
                    }
                }
            }
        };

        let queue = QueueConfig {
            min_delay: u64_of("CHATCMD_SEND_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue.min_delay),
            max_pending: u64_of("CHATCMD_MAX_QUEUE")?
                .map(|n| n as usize)
                .unwrap_or(defaults.queue.max_pending),
        };

        let wait = WaitDefaults {
            timeout: u64_of("CHATCMD_WAIT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait.timeout),
            cancel_keywords: parse_csv(str_of("CHATCMD_CANCEL_KEYWORDS"))
                .unwrap_or(defaults.wait.cancel_keywords),
            case_sensitive: bool_of("CHATCMD_CANCEL_CASE_SENSITIVE")
                .unwrap_or(defaults.wait.case_sensitive),
            policy: MatchPolicy::Sender,
        };

        let privileged_participants = parse_csv(str_of("CHATCMD_PRIVILEGED_USERS"))
            .unwrap_or_default()
            .into_iter()
            .map(ParticipantId)
            .collect();

        let rate_limit_requests = match u64_of("CHATCMD_RATE_LIMIT_REQUESTS")? {
            Some(n) => u32::try_from(n).map_err(|_| {
                Error::Config("CHATCMD_RATE_LIMIT_REQUESTS is too large".to_string())
            })?,
            None => defaults.rate_limit_requests,
        };
        let rate_limit_window = u64_of("CHATCMD_RATE_LIMIT_WINDOW_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.rate_limit_window);

        let cfg = Self {
            prefixes,
            case_sensitive_commands,
            mention_char,
            queue,
            wait,
            privileged_participants,
            rate_limit_requests,
            rate_limit_window,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefixes.iter().all(|p| p.is_empty()) {
            return Err(Error::Config(
                "at least one non-empty command prefix is required".to_string(),
            ));
        }
        if self.queue.max_pending == 0 {
            return Err(Error::Config(
                "delivery queue limit must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_requests > 0 && self.rate_limit_window.is_zero() {
            return Err(Error::Config(
                "rate limit window must be at least one second".to_string(),
            ));
        }
        if self.mention_char.is_whitespace() {
            return Err(Error::Config(
                "mention character cannot be whitespace".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured command rate limit, or `None` when disabled.
    pub fn rate_limit(&self) -> Option<CommandRateLimit> {
        (self.rate_limit_requests > 0)
            .then(|| CommandRateLimit::new(self.rate_limit_requests, self.rate_limit_window))
    }

    pub fn parser(&self) -> CommandParser {
        CommandParser::new(self.prefixes.clone(), self.mention_char)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }

        env::set_var(key, val);
    }
}

fn parse_csv(v: Option<String>) -> Option<Vec<String>> {
    let out = v?
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.prefixes, vec!["!"]);
        assert_eq!(cfg.mention_char, '@');
        assert_eq!(cfg.queue.max_pending, 100);
        assert_eq!(cfg.wait.timeout, Duration::from_secs(60));
        assert!(!cfg.wait.case_sensitive);
        assert!(cfg.rate_limit().is_some());
    }

    #[test]
    fn parses_overrides() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("CHATCMD_PREFIXES", "!, /,"),
            ("CHATCMD_CASE_SENSITIVE", "yes"),
            ("CHATCMD_MENTION_CHAR", "#"),
            ("CHATCMD_SEND_DELAY_MS", "250"),
            ("CHATCMD_MAX_QUEUE", "7"),
            ("CHATCMD_WAIT_TIMEOUT_SECS", "15"),
            ("CHATCMD_CANCEL_KEYWORDS", "stop,Salir"),
            ("CHATCMD_PRIVILEGED_USERS", "111, L222"),
            ("CHATCMD_RATE_LIMIT_REQUESTS", "0"),
        ]))
        .unwrap();

        assert_eq!(cfg.prefixes, vec!["!", "/"]);
        assert!(cfg.case_sensitive_commands);
        assert_eq!(cfg.mention_char, '#');
        assert_eq!(cfg.queue.min_delay, Duration::from_millis(250));
        assert_eq!(cfg.queue.max_pending, 7);
        assert_eq!(cfg.wait.timeout, Duration::from_secs(15));
        assert_eq!(cfg.wait.cancel_keywords, vec!["stop", "Salir"]);
        assert_eq!(
            cfg.privileged_participants,
            vec![ParticipantId::from("111"), ParticipantId::from("L222")]
        );
        assert!(cfg.rate_limit().is_none());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(EngineConfig::from_lookup(lookup(&[("CHATCMD_MAX_QUEUE", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("CHATCMD_MAX_QUEUE", "many")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("CHATCMD_MENTION_CHAR", "@@")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("CHATCMD_MENTION_CHAR", " ")])).is_err());
        assert!(
            EngineConfig::from_lookup(lookup(&[("CHATCMD_RATE_LIMIT_WINDOW_SECS", "0")])).is_err()
        );
    }
}
