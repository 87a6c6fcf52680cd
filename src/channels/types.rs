//! Channel trait and shared channel configuration.

use async_trait::async_trait;

use crate::bus::OutboundMessage;
use crate::error::Result;

/// A chat front-end adapter.
///
/// Adapters turn platform events into [`InboundMessage`](crate::bus::InboundMessage)s
/// and hand them to [`ChannelManager::admit`](super::ChannelManager::admit); the
/// manager routes outbound messages back through [`send`](Channel::send) by
/// channel name.
///
/// # Example Implementation
///
/// ```
/// use async_trait::async_trait;
/// use clawloop::bus::OutboundMessage;
/// use clawloop::channels::{BaseChannelConfig, Channel};
/// use clawloop::error::Result;
///
/// struct StdoutChannel {
///     config: BaseChannelConfig,
///     running: bool,
/// }
///
/// #[async_trait]
/// impl Channel for StdoutChannel {
///     fn name(&self) -> &str {
///         &self.config.name
///     }
///
///     async fn start(&mut self) -> Result<()> {
///         self.running = true;
///         Ok(())
///     }
///
///     async fn stop(&mut self) -> Result<()> {
///         self.running = false;
///         Ok(())
///     }
///
///     async fn send(&self, msg: OutboundMessage) -> Result<()> {
///         println!("{}", msg.content);
///         Ok(())
///     }
///
///     fn is_running(&self) -> bool {
///         self.running
///     }
///
///     fn is_allowed(&self, sender_id: &str) -> bool {
///         self.config.is_allowed(sender_id)
///     }
/// }
/// ```
#[async_trait]
pub trait Channel: Send + Sync {
    /// Routing name (e.g. "telegram", "cli"). Outbound messages are matched on it.
    fn name(&self) -> &str;

    /// Connect and begin listening.
    async fn start(&mut self) -> Result<()>;

    /// Disconnect and release resources.
    async fn stop(&mut self) -> Result<()>;

    /// Deliver one outbound message.
    async fn send(&self, msg: OutboundMessage) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Whether `sender_id` may talk to the agent through this channel.
    fn is_allowed(&self, sender_id: &str) -> bool;
}

/// Configuration every channel carries.
///
/// ```
/// use clawloop::channels::BaseChannelConfig;
///
/// let open = BaseChannelConfig::new("cli");
/// assert!(open.is_allowed("anyone"));
///
/// let closed = BaseChannelConfig::with_allowlist("telegram", vec!["42".to_string()]);
/// assert!(closed.is_allowed("42"));
/// assert!(!closed.is_allowed("7"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BaseChannelConfig {
    pub name: String,
    /// Allowed sender IDs. Empty admits everyone.
    pub allowlist: Vec<String>,
}

impl BaseChannelConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            allowlist: Vec::new(),
        }
    }

    pub fn with_allowlist(name: &str, allowlist: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            allowlist,
        }
    }

    pub fn is_allowed(&self, sender_id: &str) -> bool {
        self.allowlist.is_empty() || self.allowlist.iter().any(|id| id == sender_id)
    }
}
