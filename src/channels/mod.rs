//! Channels module - the boundary to chat front-ends
//!
//! Platform connectors live outside this crate. They implement [`Channel`],
//! push inbound messages through [`ChannelManager::admit`] and receive the
//! agent's replies through [`Channel::send`].
//!
//! ```text
//!   adapter ──admit──> ChannelManager ──publish_inbound──> MessageBus ──> AgentLoop
//!   adapter <──send─── ChannelManager <──consume_outbound── MessageBus <── AgentLoop
//! ```

mod manager;
mod types;

pub use manager::ChannelManager;
pub use types::{BaseChannelConfig, Channel};
