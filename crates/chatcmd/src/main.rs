use std::sync::Arc;

use chatcmd_core::config::EngineConfig;
use chatcmd_telegram::config::TelegramConfig;

mod commands;

#[tokio::main]
async fn main() -> Result<(), chatcmd_core::Error> {
    chatcmd_core::logging::init("chatcmd")?;

    let cfg = EngineConfig::load()?;
    let tg = TelegramConfig::load()?;
    let registry = Arc::new(commands::registry(&cfg)?);

    chatcmd_telegram::router::run_polling(tg, cfg, registry)
        .await
        .map_err(|e| chatcmd_core::Error::External(format!("telegram bot failed: {e}")))?;

    tracing::info!("chatcmd stopped");
    Ok(())
}
