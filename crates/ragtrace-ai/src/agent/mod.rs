//! Agent loop, per-turn event stream, and the streaming relay.

pub mod event;
pub mod relay;
pub mod runner;
pub mod sink;
pub mod stream;
pub mod thread;

pub use event::{AgentEvent, EventStream, TokenPayload};
pub use relay::{StreamingRelay, THINK_CLOSE, THINK_OPEN};
pub use runner::{AgentConfig, AgentRunner, TurnRequest};
#[cfg(any(test, feature = "test-utils"))]
pub use sink::RecordingSink;
pub use sink::{ChannelSink, MessageSink, NullSink, UiEvent};
pub use stream::{ToolCallAccumulator, aggregate_tool_calls};
pub use thread::{Checkpointer, MemoryCheckpointer, ThreadSnapshot, snapshot_restore, snapshot_save};
