use crate::Result;

/// Initialize logging/tracing for the engine.
///
/// Without the `subscriber` feature this is a no-op and the host process is
/// expected to install its own `tracing` subscriber.
pub fn init(service_name: &str) -> Result<()> {
    let _ = service_name;

    #[cfg(feature = "subscriber")]
    {
        use tracing_subscriber::{fmt, EnvFilter};

        // Default: info for our crates, warn for everything else.
        // Can be overridden with `RUST_LOG`.
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "warn,chatcmd=info,chatcmd_core=info,chatcmd_telegram=info,{service_name}=info"
            ))
        });

        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(true)
            .try_init()
            .map_err(|e| crate::Error::Config(format!("logging already initialised: {e}")))?;
    }

    Ok(())
}
