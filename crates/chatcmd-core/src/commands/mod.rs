//! Command table, text parsing and the pre-dispatch middleware chain.

pub mod middleware;
pub mod parser;
pub mod registry;

pub use middleware::{CommandRateLimit, Flow, Middleware, MiddlewareChain};
pub use parser::{CommandArgs, CommandParser, ParsedCommand};
pub use registry::{Command, CommandClass, CommandRegistry, RegisteredCommand};
