//! Suspend/resume engine: one [`ChatContext`] per dispatched conversation.

pub mod context;
pub mod replies;
pub mod wait;

pub use context::{ChatContext, ContextServices, Retarget};
pub use replies::{ReplyHub, ReplySource, Subscription};
pub use wait::{MatchPolicy, ReplyMatch, WaitDefaults, WaitOptions, WaitOutcome, WaitRequest};
