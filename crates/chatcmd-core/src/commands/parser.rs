use regex::Regex;

use crate::{
    domain::{ChatId, MessageRef, ParticipantId, ParticipantIds, SenderType},
    messaging::types::InboundEvent,
};

/// A message that starts with a configured prefix, split into its parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCommand {
    pub prefix: String,
    /// Command token as typed (before registry lookup).
    pub token: String,
    pub args: Vec<String>,
    pub raw_args: String,
}

/// Splits inbound text into prefix, command token and arguments.
#[derive(Clone, Debug)]
pub struct CommandParser {
    prefixes: Vec<String>,
    mention_char: char,
    mention_re: Option<Regex>,
}

impl CommandParser {
    pub fn new(prefixes: Vec<String>, mention_char: char) -> Self {
        let pattern = format!(
            r"(?:^|\s){}([\w.:\-]+)",
            regex::escape(&mention_char.to_string())
        );
        Self {
            prefixes: prefixes.into_iter().filter(|p| !p.is_empty()).collect(),
            mention_char,
            mention_re: Regex::new(&pattern).ok(),
        }
    }

    pub fn mention_char(&self) -> char {
        self.mention_char
    }

    /// `None` when the text does not start with any configured prefix, or the
    /// prefix is not followed by a command token.
    ///
    /// Prefixes are tried in configured order; the first match wins.
    pub fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let text = text.trim_start();
        let (prefix, rest) = self
            .prefixes
            .iter()
            .find_map(|p| text.strip_prefix(p.as_str()).map(|rest| (p, rest)))?;

        if rest.starts_with(char::is_whitespace) {
            return None;
        }
        let mut parts = rest.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("");
        let raw_args = parts.next().unwrap_or("").trim().to_string();

        // `/cmd@botname` addressing: drop the bot suffix.
        let token = first.split('@').next().unwrap_or("");
        if token.is_empty() {
            return None;
        }

        Some(ParsedCommand {
            prefix: prefix.clone(),
            token: token.to_string(),
            args: split_words(&raw_args),
            raw_args,
        })
    }

    /// Participant ids mentioned as `<mention_char><id>` in `text`.
    pub fn mentions(&self, text: &str) -> Vec<ParticipantId> {
        let Some(re) = &self.mention_re else {
            return Vec::new();
        };
        re.captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| ParticipantId(m.as_str().to_string()))
            .collect()
    }
}

/// Arguments handed to a command's `execute`.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandArgs {
    pub chat_id: ChatId,
    pub sender_type: SenderType,
    /// Sender, in both identity namespaces.
    pub participant: ParticipantIds,
    /// Registered command name.
    pub command: String,
    /// Token the user typed (name or alias).
    pub invoked_as: String,
    pub prefix: String,
    pub args: Vec<String>,
    pub raw_args: String,
    pub mentions: Vec<ParticipantId>,
    pub origin: MessageRef,
}

impl CommandArgs {
    pub fn from_event(
        event: &InboundEvent,
        parsed: ParsedCommand,
        command: &str,
        parser: &CommandParser,
    ) -> Self {
        Self {
            chat_id: event.chat_id.clone(),
            sender_type: event.sender_type,
            participant: event.sender.clone(),
            command: command.to_string(),
            mentions: parser.mentions(&parsed.raw_args),
            invoked_as: parsed.token,
            prefix: parsed.prefix,
            args: parsed.args,
            raw_args: parsed.raw_args,
            origin: event.message_ref(),
        }
    }

    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }
}

/// Whitespace split that keeps quoted groups together.
fn split_words(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes: Option<char> = None;
    let mut quoted = false;

    for ch in s.chars() {
        match (in_quotes, ch) {
            (None, '"' | '\'') => {
                in_quotes = Some(ch);
                quoted = true;
            }
            (Some(q), c) if c == q => in_quotes = None,
            (None, c) if c.is_whitespace() => {
                if !cur.is_empty() || quoted {
                    out.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            (_, c) => cur.push(c),
        }
    }

    if !cur.is_empty() || quoted {
        out.push(cur);
    }
    out
}
