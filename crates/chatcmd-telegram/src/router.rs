use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::UserId};
use tracing::{info, warn};

use chatcmd_core::{
    commands::CommandRegistry,
    config::EngineConfig,
    dispatcher::{DispatchOutcome, Dispatcher as CommandDispatcher},
    messaging::port::Transport,
};

use crate::{access::AllowList, config::TelegramConfig, inbound::to_inbound_event, TelegramTransport};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CommandDispatcher>,
    pub bot_id: UserId,
}

/// Poll Telegram and feed every message to the command dispatcher until the
/// process is stopped.
pub async fn run_polling(
    tg: TelegramConfig,
    engine_cfg: EngineConfig,
    registry: Arc<CommandRegistry>,
) -> anyhow::Result<()> {
    let bot = Bot::new(tg.bot_token.clone());

    let me = bot.get_me().await?;
    info!(username = me.username(), commands = registry.len(), "chatcmd started");
    if tg.allowed_users.is_empty() {
        warn!("TELEGRAM_ALLOWED_USERS is empty; every sender may run commands");
    } else {
        info!(allowed = tg.allowed_users.len(), "allow list active");
    }

    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(
        bot.clone(),
        me.user.id,
        me.user.username.as_deref(),
    ));

    let rate_limit = engine_cfg.rate_limit();
    let mut builder = CommandDispatcher::builder(registry, transport, engine_cfg);
    if !tg.allowed_users.is_empty() {
        builder = builder.middleware(Arc::new(AllowList::new(tg.allowed_users.clone())));
    }
    if let Some(limit) = rate_limit {
        builder = builder.middleware(Arc::new(limit));
    }

    let state = Arc::new(AppState {
        engine: Arc::new(builder.build()?),
        bot_id: me.user.id,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .build()
        .dispatch()
        .await;

    state.engine.queue().close();
    Ok(())
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(event) = to_inbound_event(&msg, state.bot_id) else {
        return Ok(());
    };

    // Handlers run on their own tasks; this returns as soon as routing is done.
    if let DispatchOutcome::Unknown(token) = state.engine.handle_event(event).await {
        info!(chat_id = msg.chat.id.0, %token, "unknown command");
    }
    Ok(())
}
