use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{commands::parser::CommandArgs, conversation::ChatContext, Error, Result};

/// A chat command.
///
/// `execute` runs on its own task with a fresh [`ChatContext`]; returning an
/// error ends that one conversation and is logged by the dispatcher.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn aliases(&self) -> &[&str] {
        &[]
    }

    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, ctx: ChatContext, args: CommandArgs) -> Result<()>;
}

/// Who may run a command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommandClass {
    #[default]
    Normal,
    /// Only senders listed as privileged in the engine config.
    Privileged,
}

#[derive(Clone)]
pub struct RegisteredCommand {
    pub command: Arc<dyn Command>,
    pub class: CommandClass,
}

impl RegisteredCommand {
    pub fn name(&self) -> &str {
        self.command.name()
    }
}

/// Immutable command table keyed by name and alias.
///
/// Built once with [`CommandRegistry::builder`] and shared behind an `Arc`.
pub struct CommandRegistry {
    entries: Vec<RegisteredCommand>,
    index: HashMap<String, usize>,
    case_sensitive: bool,
}

pub struct RegistryBuilder {
    registry: CommandRegistry,
}

impl RegistryBuilder {
    pub fn add(self, command: impl Command + 'static, class: CommandClass) -> Result<Self> {
        self.add_shared(Arc::new(command), class)
    }

    pub fn add_shared(mut self, command: Arc<dyn Command>, class: CommandClass) -> Result<Self> {
        let reg = &mut self.registry;
        let slot = reg.entries.len();

        let mut keys = vec![reg.key(command.name())];
        keys.extend(command.aliases().iter().map(|a| reg.key(a)));
        for key in &keys {
            if key.is_empty() || key.chars().any(char::is_whitespace) {
                return Err(Error::Config(format!(
                    "invalid command name or alias: {key:?}"
                )));
            }
            if reg.index.contains_key(key) {
                return Err(Error::DuplicateCommand(key.clone()));
            }
        }

        for key in keys {
            // A command listing its own name as alias is harmless.
            reg.index.entry(key).or_insert(slot);
        }
        reg.entries.push(RegisteredCommand { command, class });
        Ok(self)
    }

    pub fn build(self) -> CommandRegistry {
        self.registry
    }
}

impl CommandRegistry {
    pub fn builder(case_sensitive: bool) -> RegistryBuilder {
        RegistryBuilder {
            registry: CommandRegistry {
                entries: Vec::new(),
                index: HashMap::new(),
                case_sensitive,
            },
        }
    }

    fn key(&self, token: &str) -> String {
        if self.case_sensitive {
            token.to_string()
        } else {
            token.to_lowercase()
        }
    }

    /// Whether names and aliases are matched case-sensitively.
    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Look up a command by name or alias under the registry's case policy.
    pub fn resolve(&self, token: &str) -> Option<&RegisteredCommand> {
        self.index
            .get(&self.key(token))
            .and_then(|&slot| self.entries.get(slot))
    }

    /// Commands in registration order.
    pub fn commands(&self) -> impl Iterator<Item = &RegisteredCommand> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static [&'static str]);

    #[async_trait]
    impl Command for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn aliases(&self) -> &[&str] {
            self.1
        }

        async fn execute(&self, _ctx: ChatContext, _args: CommandArgs) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn resolves_names_and_aliases_case_insensitively() {
        let reg = CommandRegistry::builder(false)
            .add(Named("Ping", &["p"]), CommandClass::Normal)
            .unwrap()
            .add(Named("ban", &[]), CommandClass::Privileged)
            .unwrap()
            .build();

        assert_eq!(reg.resolve("PING").map(|c| c.name()), Some("Ping"));
        assert_eq!(reg.resolve("P").map(|c| c.name()), Some("Ping"));
        assert_eq!(
            reg.resolve("ban").map(|c| c.class),
            Some(CommandClass::Privileged)
        );
        assert!(reg.resolve("pong").is_none());
        assert_eq!(
            reg.commands().map(|c| c.name()).collect::<Vec<_>>(),
            vec!["Ping", "ban"]
        );
    }

    #[test]
    fn case_sensitive_registry_keeps_case() {
        let reg = CommandRegistry::builder(true)
            .add(Named("Ping", &[]), CommandClass::Normal)
            .unwrap()
            .build();
        assert!(reg.resolve("Ping").is_some());
        assert!(reg.resolve("ping").is_none());
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let res = CommandRegistry::builder(false)
            .add(Named("ping", &[]), CommandClass::Normal)
            .unwrap()
            .add(Named("pong", &["PING"]), CommandClass::Normal);
        assert!(matches!(res, Err(Error::DuplicateCommand(k)) if k == "ping"));
    }

    #[test]
    fn blank_names_are_rejected() {
        let res = CommandRegistry::builder(false).add(Named("two words", &[]), CommandClass::Normal);
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
