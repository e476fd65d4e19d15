/// Core error type for the command engine.
///
/// Adapter crates map their transport-specific failures into [`Error::Transport`]
/// so the engine can treat every delivery failure the same way.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery queue is full ({limit} pending)")]
    QueueOverflow { limit: usize },

    #[error("delivery queue is closed")]
    QueueClosed,

    #[error("a reply is already being awaited on this conversation")]
    IllegalConcurrentWait,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("duplicate command name or alias: {0}")]
    DuplicateCommand(String),

    #[error("sender is not allowed to run {0}")]
    Unauthorized(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
