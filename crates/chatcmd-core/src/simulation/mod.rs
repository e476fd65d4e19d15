//! Deterministic harness for running one command against a scripted user.
//!
//! The command runs through the production parser, registry and
//! [`ChatContext`]; only the transport and the inbound stream are replaced.
//!
//! ```no_run
//! # use chatcmd_core::simulation::{ChatSimulation, SimulationConfig};
//! # async fn demo(cmd: impl chatcmd_core::commands::Command + 'static) -> chatcmd_core::Result<()> {
//! let mut sim = ChatSimulation::new(cmd, SimulationConfig::default());
//! sim.enqueue_incoming_text("chris");
//! let report = sim.start_simulation("").await?;
//! assert_eq!(report.sent_texts(), vec!["What's your name?", "Hello chris"]);
//! # Ok(())
//! # }
//! ```

mod script;
mod transport;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

pub use script::{ScriptedReplies, WaitRecord, WaitResolution};
pub use transport::{RecordingTransport, SentRecord};

use crate::{
    commands::{Command, CommandArgs, CommandClass, CommandParser, CommandRegistry},
    conversation::{ChatContext, ContextServices, WaitDefaults},
    dispatcher::conversation_identity,
    domain::{ChatId, MessageId, ParticipantIds, SenderType},
    messaging::{
        queue::{DeliveryQueue, QueueConfig},
        types::{GroupMetadata, InboundContent, InboundEvent, MediaRef, MessageKind},
    },
    Error, Result,
};

/// Who the simulated user is and how the engine is configured for the run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub chat_id: ChatId,
    pub participant: ParticipantIds,
    pub sender_type: SenderType,
    pub prefix: String,
    pub mention_char: char,
    pub wait: WaitDefaults,
    /// Whether the simulated sender may run privileged commands.
    pub privileged: bool,
    /// Returned by group metadata lookups on `chat_id`.
    pub group_metadata: Option<GroupMetadata>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            chat_id: ChatId::from("sim-chat"),
            participant: ParticipantIds::primary("5550100"),
            sender_type: SenderType::Individual,
            prefix: "!".to_string(),
            mention_char: '@',
            wait: WaitDefaults::default(),
            privileged: false,
            group_metadata: None,
        }
    }
}

/// Everything a simulation run observed.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub sent: Vec<SentRecord>,
    pub waits: Vec<WaitRecord>,
    /// The handler's result; errors and panics are rendered as text.
    pub outcome: std::result::Result<(), String>,
    pub remaining_script: Vec<InboundContent>,
}

impl SimulationReport {
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|r| r.payload.as_text().map(str::to_string))
            .collect()
    }

    pub fn sent_of(&self, kind: MessageKind) -> Vec<&SentRecord> {
        self.sent.iter().filter(|r| r.kind == kind).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct ChatSimulation {
    command: Arc<dyn Command>,
    class: CommandClass,
    config: SimulationConfig,
    script: Vec<InboundContent>,
}

impl ChatSimulation {
    pub fn new(command: impl Command + 'static, config: SimulationConfig) -> Self {
        Self::with_class(Arc::new(command), CommandClass::Normal, config)
    }

    pub fn with_class(
        command: Arc<dyn Command>,
        class: CommandClass,
        config: SimulationConfig,
    ) -> Self {
        Self {
            command,
            class,
            config,
            script: Vec::new(),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    // ============== Script ==============

    pub fn enqueue_incoming(&mut self, content: InboundContent) -> &mut Self {
        self.script.push(content);
        self
    }

    pub fn enqueue_incoming_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.enqueue_incoming(InboundContent::text(text))
    }

    pub fn enqueue_incoming_image(&mut self, media: MediaRef) -> &mut Self {
        self.enqueue_incoming(InboundContent::Image(media))
    }

    pub fn enqueue_incoming_video(&mut self, media: MediaRef) -> &mut Self {
        self.enqueue_incoming(InboundContent::Video(media))
    }

    pub fn enqueue_incoming_audio(&mut self, media: MediaRef) -> &mut Self {
        self.enqueue_incoming(InboundContent::Audio(media))
    }

    pub fn enqueue_incoming_sticker(&mut self, media: MediaRef) -> &mut Self {
        self.enqueue_incoming(InboundContent::Sticker(media))
    }

    pub fn enqueue_incoming_document(&mut self, media: MediaRef) -> &mut Self {
        self.enqueue_incoming(InboundContent::Document(media))
    }

    pub fn enqueue_incoming_location(&mut self, latitude: f64, longitude: f64) -> &mut Self {
        self.enqueue_incoming(InboundContent::Location {
            latitude,
            longitude,
        })
    }

    pub fn enqueue_incoming_contact(
        &mut self,
        name: impl Into<String>,
        phone: impl Into<String>,
    ) -> &mut Self {
        self.enqueue_incoming(InboundContent::Contact {
            name: name.into(),
            phone: phone.into(),
        })
    }

    pub fn enqueue_incoming_reaction(&mut self, emoji: impl Into<String>) -> &mut Self {
        self.enqueue_incoming(InboundContent::Reaction {
            emoji: emoji.into(),
            target: None,
        })
    }

    /// Append items from a JSON array of inbound contents, e.g.
    /// `[{"kind":"text","text":"chris"},{"kind":"location","latitude":1.0,"longitude":2.0}]`.
    pub fn load_script_json(&mut self, json: &str) -> Result<&mut Self> {
        let items: Vec<InboundContent> = serde_json::from_str(json)?;
        self.script.extend(items);
        Ok(self)
    }

    // ============== Run ==============

    /// Invoke the command as if the simulated user had typed
    /// `<prefix><name> <args>`, and run it to completion.
    ///
    /// The script is consumed by this run; unused items are returned in the
    /// report. Errors are returned only when the command could not be invoked.
    pub async fn start_simulation(&mut self, args: &str) -> Result<SimulationReport> {
        let cfg = &self.config;
        let text = match args.trim() {
            "" => format!("{}{}", cfg.prefix, self.command.name()),
            args => format!("{}{} {}", cfg.prefix, self.command.name(), args),
        };

        let parser = CommandParser::new(vec![cfg.prefix.clone()], cfg.mention_char);
        let registry = CommandRegistry::builder(false)
            .add_shared(self.command.clone(), self.class)?
            .build();

        let parsed = parser.parse(&text).ok_or_else(|| {
            Error::Config(format!("prefix {:?} does not start a command", cfg.prefix))
        })?;
        let found = registry
            .resolve(&parsed.token)
            .ok_or_else(|| Error::UnknownCommand(parsed.token.clone()))?;
        if found.class == CommandClass::Privileged && !cfg.privileged {
            return Err(Error::Unauthorized(found.name().to_string()));
        }

        let event = InboundEvent {
            chat_id: cfg.chat_id.clone(),
            sender: cfg.participant.clone(),
            sender_type: cfg.sender_type,
            message_id: MessageId("sim-invocation".to_string()),
            content: InboundContent::text(text.clone()),
            timestamp: Utc::now(),
            from_self: false,
        };
        let command_args = CommandArgs::from_event(&event, parsed, found.name(), &parser);

        let transport = Arc::new(RecordingTransport::new());
        if let Some(meta) = &cfg.group_metadata {
            transport.set_group_metadata(cfg.chat_id.clone(), meta.clone());
        }
        let replies = Arc::new(ScriptedReplies::new(std::mem::take(&mut self.script)));
        let queue = DeliveryQueue::spawn(
            transport.clone(),
            QueueConfig {
                min_delay: Duration::ZERO,
                ..QueueConfig::default()
            },
        );
        let services = ContextServices {
            queue: queue.clone(),
            transport: transport.clone(),
            replies: replies.clone(),
            wait_defaults: cfg.wait.clone(),
            mention_char: cfg.mention_char,
        };
        let ctx = ChatContext::new(conversation_identity(&event), services);

        debug!(command = found.name(), %text, "simulation started");
        let command = found.command.clone();
        let outcome = match tokio::spawn(async move { command.execute(ctx, command_args).await })
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err("command panicked".to_string()),
            Err(e) => Err(e.to_string()),
        };
        queue.close();

        Ok(SimulationReport {
            sent: transport.records(),
            waits: replies.waits(),
            outcome,
            remaining_script: replies.remaining(),
        })
    }
}
