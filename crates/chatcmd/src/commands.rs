//! Bundled chat commands.

use std::sync::Arc;

use async_trait::async_trait;

use chatcmd_core::{
    commands::{Command, CommandArgs, CommandClass, CommandRegistry},
    config::EngineConfig,
    conversation::{ChatContext, WaitOptions, WaitOutcome},
    domain::ChatId,
    Result,
};

pub fn registry(cfg: &EngineConfig) -> Result<CommandRegistry> {
    let base: Vec<(Arc<dyn Command>, CommandClass)> = vec![
        (Arc::new(Ping), CommandClass::Normal),
        (Arc::new(Echo), CommandClass::Normal),
        (Arc::new(AskName), CommandClass::Normal),
        (Arc::new(Members), CommandClass::Normal),
        (Arc::new(Announce), CommandClass::Privileged),
    ];

    let prefix = cfg.prefixes.first().cloned().unwrap_or_default();
    let mut lines: Vec<String> = base
        .iter()
        .map(|(cmd, class)| help_line(&prefix, cmd.as_ref(), *class))
        .collect();
    lines.push(help_line(&prefix, &Help::default(), CommandClass::Normal));

    let mut builder = CommandRegistry::builder(cfg.case_sensitive_commands);
    for (cmd, class) in base {
        builder = builder.add_shared(cmd, class)?;
    }
    Ok(builder.add(Help { lines }, CommandClass::Normal)?.build())
}

fn help_line(prefix: &str, cmd: &dyn Command, class: CommandClass) -> String {
    let mut line = format!("{prefix}{}", cmd.name());
    if !cmd.aliases().is_empty() {
        line.push_str(&format!(" ({})", cmd.aliases().join(", ")));
    }
    if !cmd.description().is_empty() {
        line.push_str(&format!(" - {}", cmd.description()));
    }
    if class == CommandClass::Privileged {
        line.push_str(" [admin]");
    }
    line
}

pub struct Ping;

#[async_trait]
impl Command for Ping {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "check the bot is alive"
    }

    async fn execute(&self, ctx: ChatContext, _args: CommandArgs) -> Result<()> {
        ctx.reply_text("pong").await;
        Ok(())
    }
}

pub struct Echo;

#[async_trait]
impl Command for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn aliases(&self) -> &[&str] {
        &["say"]
    }

    fn description(&self) -> &str {
        "repeat the given text"
    }

    async fn execute(&self, ctx: ChatContext, args: CommandArgs) -> Result<()> {
        if args.raw_args.is_empty() {
            ctx.reply_text(format!("Usage: {}{} <text>", args.prefix, args.invoked_as))
                .await;
            return Ok(());
        }
        ctx.send_text(args.raw_args).await;
        Ok(())
    }
}

/// Asks for the sender's name and greets them.
pub struct AskName;

#[async_trait]
impl Command for AskName {
    fn name(&self) -> &str {
        "name"
    }

    fn description(&self) -> &str {
        "tell me your name"
    }

    async fn execute(&self, ctx: ChatContext, _args: CommandArgs) -> Result<()> {
        ctx.send_text("What's your name?").await;
        match ctx.wait_text(WaitOptions::new().timeout_secs(30)).await? {
            WaitOutcome::Value(name) => ctx.send_text(format!("Hello {}", name.trim())).await,
            WaitOutcome::Cancelled => ctx.send_text("Okay, never mind.").await,
            WaitOutcome::TimedOut => ctx.send_text("No answer, maybe next time.").await,
        };
        Ok(())
    }
}

pub struct Members;

#[async_trait]
impl Command for Members {
    fn name(&self) -> &str {
        "members"
    }

    fn description(&self) -> &str {
        "list group admins"
    }

    async fn execute(&self, ctx: ChatContext, _args: CommandArgs) -> Result<()> {
        let Some(meta) = ctx.group_metadata().await else {
            ctx.reply_text("This command only works in groups.").await;
            return Ok(());
        };

        let mentions = meta
            .members
            .iter()
            .map(|m| m.as_mention_formatted.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let ids = meta.members.iter().map(|m| m.raw_id.clone()).collect();
        ctx.send_text_with_mentions(format!("{}: {mentions}", meta.group_name), ids)
            .await;
        Ok(())
    }
}

/// Posts a message into another chat: `announce <chat_id> <text>`.
pub struct Announce;

#[async_trait]
impl Command for Announce {
    fn name(&self) -> &str {
        "announce"
    }

    fn description(&self) -> &str {
        "post text into another group"
    }

    async fn execute(&self, ctx: ChatContext, args: CommandArgs) -> Result<()> {
        let (Some(target), Some((_, text))) = (args.arg(0), args.raw_args.split_once(' ')) else {
            ctx.reply_text(format!("Usage: {}announce <chat_id> <text>", args.prefix))
                .await;
            return Ok(());
        };

        let sent = ctx
            .targeted_to_group(ChatId(target.to_string()))
            .send_text(text.trim())
            .await;
        let status = if sent.is_some() { "Sent." } else { "Delivery failed." };
        ctx.reply_text(status).await;
        Ok(())
    }
}

#[derive(Default)]
pub struct Help {
    lines: Vec<String>,
}

#[async_trait]
impl Command for Help {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "list commands"
    }

    async fn execute(&self, ctx: ChatContext, _args: CommandArgs) -> Result<()> {
        ctx.send_text(self.lines.join("\n")).await;
        Ok(())
    }
}
