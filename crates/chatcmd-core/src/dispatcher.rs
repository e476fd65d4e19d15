//! Routes inbound events to pending waits or to registered commands.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    commands::{
        Command, CommandArgs, CommandClass, CommandParser, CommandRegistry, Flow, Middleware,
        MiddlewareChain,
    },
    config::EngineConfig,
    conversation::{ChatContext, ContextServices, ReplyHub},
    domain::{ConversationIdentity, ParticipantId, ParticipantIds},
    messaging::{port::Transport, queue::DeliveryQueue, types::InboundEvent},
    Error, Result,
};

/// What the dispatcher did with one inbound event.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Sent by the engine's own account.
    Ignored,
    /// Resolved a pending wait.
    ConsumedByWait,
    /// A middleware stage stopped it.
    Stopped,
    NotACommand,
    Unknown(String),
    Unauthorized(String),
    /// Handler running on its own task.
    Started(JoinHandle<()>),
}

/// Identity of the conversation an inbound event starts.
pub fn conversation_identity(event: &InboundEvent) -> ConversationIdentity {
    ConversationIdentity::new(
        event.chat_id.clone(),
        event.sender.clone(),
        event.sender_type,
    )
    .with_origin(event.message_ref())
}

pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    parser: CommandParser,
    middleware: MiddlewareChain,
    fallback: Option<Arc<dyn Command>>,
    hub: ReplyHub,
    services: ContextServices,
    privileged: Vec<ParticipantId>,
}

pub struct DispatcherBuilder {
    registry: Arc<CommandRegistry>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    middleware: MiddlewareChain,
    fallback: Option<Arc<dyn Command>>,
    queue: Option<DeliveryQueue>,
    hub: Option<ReplyHub>,
}

impl DispatcherBuilder {
    pub fn middleware(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.middleware.push(stage);
        self
    }

    /// Handler for prefixed messages that match no command.
    pub fn fallback(mut self, command: Arc<dyn Command>) -> Self {
        self.fallback = Some(command);
        self
    }

    /// Use an existing delivery queue instead of spawning one.
    pub fn queue(mut self, queue: DeliveryQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn reply_hub(mut self, hub: ReplyHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Must be called inside a tokio runtime when no queue was supplied.
    ///
    /// Fails when the registry's case policy differs from the config's.
    pub fn build(self) -> Result<Dispatcher> {
        if self.registry.case_sensitive() != self.config.case_sensitive_commands {
            return Err(Error::Config(format!(
                "registry case sensitivity ({}) does not match CHATCMD_CASE_SENSITIVE ({})",
                self.registry.case_sensitive(),
                self.config.case_sensitive_commands
            )));
        }

        let queue = self
            .queue
            .unwrap_or_else(|| DeliveryQueue::spawn(self.transport.clone(), self.config.queue));
        let hub = self.hub.unwrap_or_default();

        let services = ContextServices {
            queue,
            transport: self.transport,
            replies: Arc::new(hub.clone()),
            wait_defaults: self.config.wait.clone(),
            mention_char: self.config.mention_char,
        };

        Ok(Dispatcher {
            registry: self.registry,
            parser: self.config.parser(),
            middleware: self.middleware,
            fallback: self.fallback,
            hub,
            services,
            privileged: self.config.privileged_participants,
        })
    }
}

impl Dispatcher {
    pub fn builder(
        registry: Arc<CommandRegistry>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            transport,
            config,
            middleware: MiddlewareChain::new(),
            fallback: None,
            queue: None,
            hub: None,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.services.queue
    }

    pub fn reply_hub(&self) -> &ReplyHub {
        &self.hub
    }

    /// A context for engine-initiated conversations (not started by a command).
    pub fn context_for(&self, identity: ConversationIdentity) -> ChatContext {
        ChatContext::new(identity, self.services.clone())
    }

    fn is_privileged(&self, sender: &ParticipantIds) -> bool {
        self.privileged.iter().any(|p| sender.contains(p))
    }

    /// Route one inbound event. Never waits for a handler to finish.
    pub async fn handle_event(&self, event: InboundEvent) -> DispatchOutcome {
        if event.from_self {
            return DispatchOutcome::Ignored;
        }

        if self.hub.publish(&event) {
            debug!(chat_id = %event.chat_id, kind = ?event.kind(), "reply delivered to pending wait");
            return DispatchOutcome::ConsumedByWait;
        }

        let parsed = event.text_body().and_then(|t| self.parser.parse(t));

        if self.middleware.run(&event, parsed.as_ref()).await == Flow::Stop {
            debug!(chat_id = %event.chat_id, "middleware stopped event");
            return DispatchOutcome::Stopped;
        }

        let Some(parsed) = parsed else {
            return DispatchOutcome::NotACommand;
        };

        let (command, class) = match self.registry.resolve(&parsed.token) {
            Some(found) => (found.command.clone(), found.class),
            None => match &self.fallback {
                Some(fallback) => (fallback.clone(), CommandClass::Normal),
                None => {
                    debug!(chat_id = %event.chat_id, token = %parsed.token, "unknown command");
                    return DispatchOutcome::Unknown(parsed.token);
                }
            },
        };

        if class == CommandClass::Privileged && !self.is_privileged(&event.sender) {
            debug!(
                chat_id = %event.chat_id,
                command = command.name(),
                "privileged command refused"
            );
            return DispatchOutcome::Unauthorized(command.name().to_string());
        }

        let args = CommandArgs::from_event(&event, parsed, command.name(), &self.parser);
        let ctx = ChatContext::new(conversation_identity(&event), self.services.clone());
        DispatchOutcome::Started(spawn_handler(command, ctx, args))
    }

    /// Pump inbound events until the stream ends or `cancel` fires.
    ///
    /// Running handlers are left alone; the delivery queue is not flushed.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundEvent>, cancel: CancellationToken) {
        info!(commands = self.registry.len(), "dispatcher running");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = inbound.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let _ = self.handle_event(event).await;
        }
        info!("dispatcher stopped");
    }
}

/// Run a handler on its own task; errors and panics stop at this boundary.
fn spawn_handler(command: Arc<dyn Command>, ctx: ChatContext, args: CommandArgs) -> JoinHandle<()> {
    let name = command.name().to_string();
    let chat_id = args.chat_id.clone();

    tokio::spawn(async move {
        let run = tokio::spawn(async move { command.execute(ctx, args).await });
        match run.await {
            Ok(Ok(())) => debug!(command = %name, %chat_id, "command finished"),
            Ok(Err(e)) => error!(command = %name, %chat_id, error = %e, "command failed"),
            Err(e) if e.is_panic() => error!(command = %name, %chat_id, "command panicked"),
            Err(e) => warn!(command = %name, %chat_id, error = %e, "command task aborted"),
        }
    })
}
