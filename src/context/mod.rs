//! Per-turn execution context.
//!
//! Each agent turn carries its own context with:
//! - Workspace id and real path
//! - Container image, with nested overrides
//! - Output sink for streamed command output
//! - Agent-suggested commit message

mod sink;
mod turn;

pub use sink::{BufferSink, ChannelSink, OutputChunk, OutputSink, line_callback};
pub use turn::{ExecutionContext, TurnContext};
