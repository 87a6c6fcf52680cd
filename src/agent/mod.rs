//! Agent module - the per-session turn pipeline
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  MessageBus │────>│  AgentLoop  │────>│ LLMProvider │
//! │  (inbound)  │<────│  (workers)  │     │   (retry)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                       │    │    │
//!                       ▼    ▼    ▼
//!          SessionStore  MemoryStore  ToolExecutor
//! ```
//!
//! [`ContextBuilder`] assembles what the model sees; [`AgentLoop`] runs the
//! think, act, observe cycle and records the results.

mod context;
mod r#loop;

pub use context::{ContextBuilder, RuntimeContext};
pub use r#loop::{AgentLoop, TurnState, ITERATION_LIMIT_MARKER};
