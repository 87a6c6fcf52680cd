//! Channel Manager
//!
//! Owns the registered channels, gates inbound senders against each
//! channel's allow-list and routes outbound messages back by channel name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{BusEvent, InboundMessage, MessageBus, OutboundMessage};
use crate::error::{ClawError, Result};

use super::Channel;

type ChannelMap = Arc<RwLock<HashMap<String, Box<dyn Channel>>>>;

/// Lifecycle and routing for all channels.
///
/// ```
/// use clawloop::bus::MessageBus;
/// use clawloop::channels::ChannelManager;
///
/// # tokio_test::block_on(async {
/// let manager = ChannelManager::new(MessageBus::new());
/// assert!(manager.channels().await.is_empty());
/// # })
/// ```
pub struct ChannelManager {
    channels: ChannelMap,
    bus: MessageBus,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    dispatcher_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl ChannelManager {
    pub fn new(bus: MessageBus) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            bus,
            shutdown_tx,
            shutdown_rx,
            dispatcher_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a channel under its name, replacing any previous one.
    pub async fn register(&self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "Registering channel");
        self.channels.write().await.insert(name, channel);
    }

    /// Registered channel names, sorted.
    pub async fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn has_channel(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(name)
    }

    /// Accept an inbound message from an adapter.
    ///
    /// The sender must pass the owning channel's allow-list; rejected
    /// senders produce [`BusEvent::Rejected`] and a `SecurityViolation`.
    /// Messages for unregistered channels are refused with `NotFound`.
    pub async fn admit(&self, msg: InboundMessage) -> Result<()> {
        let allowed = {
            let channels = self.channels.read().await;
            let channel = channels
                .get(&msg.channel)
                .ok_or_else(|| ClawError::NotFound(format!("channel '{}'", msg.channel)))?;
            channel.is_allowed(&msg.sender_id)
        };

        if !allowed {
            warn!(
                channel = %msg.channel,
                sender_id = %msg.sender_id,
                "Sender not in allow-list, dropping message"
            );
            self.bus.emit(BusEvent::Rejected {
                channel: msg.channel.clone(),
                sender_id: msg.sender_id.clone(),
            });
            return Err(ClawError::SecurityViolation(format!(
                "sender '{}' is not allowed on channel '{}'",
                msg.sender_id, msg.channel
            )));
        }

        self.bus.publish_inbound(msg)
    }

    /// Start every channel and the outbound dispatcher.
    ///
    /// A channel that fails to start is logged and skipped.
    pub async fn start_all(&self) -> Result<()> {
        {
            let handle = self.dispatcher_handle.read().await;
            if handle.as_ref().is_some_and(|h| !h.is_finished()) {
                warn!("Outbound dispatcher already running, skipping start");
                return Ok(());
            }
        }

        {
            let mut channels = self.channels.write().await;
            for (name, channel) in channels.iter_mut() {
                info!(channel = %name, "Starting channel");
                if let Err(e) = channel.start().await {
                    error!(channel = %name, error = %e, "Failed to start channel");
                }
            }
        }

        let _ = self.shutdown_tx.send(false);
        let handle = tokio::spawn(dispatch_outbound(
            self.bus.clone(),
            Arc::clone(&self.channels),
            self.shutdown_rx.clone(),
        ));
        *self.dispatcher_handle.write().await = Some(handle);
        Ok(())
    }

    /// Stop the dispatcher, then every channel.
    pub async fn stop_all(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.dispatcher_handle.write().await.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(_) => debug!("Outbound dispatcher stopped"),
                Err(_) => warn!("Outbound dispatcher did not stop within timeout"),
            }
        }

        let mut channels = self.channels.write().await;
        for (name, channel) in channels.iter_mut() {
            info!(channel = %name, "Stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "Failed to stop channel");
            }
        }
        Ok(())
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }
}

/// Route outbound messages to their channel until shutdown.
async fn dispatch_outbound(
    bus: MessageBus,
    channels: ChannelMap,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Outbound dispatcher started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            msg = bus.consume_outbound() => {
                let Some(msg) = msg else {
                    info!("Outbound queue closed");
                    break;
                };
                deliver(&bus, &channels, msg).await;
            }
        }
    }
    info!("Outbound dispatcher stopped");
}

async fn deliver(bus: &MessageBus, channels: &ChannelMap, msg: OutboundMessage) {
    let session_key = msg.session_key.clone();
    let channel_name = msg.channel.clone();

    let result = {
        let channels = channels.read().await;
        match channels.get(&channel_name) {
            Some(channel) => channel.send(msg).await,
            None => Err(ClawError::NotFound(format!("channel '{}'", channel_name))),
        }
    };

    if let Err(e) = result {
        error!(
            session_key = %session_key,
            channel = %channel_name,
            error = %e,
            "Outbound delivery failed"
        );
        bus.emit(BusEvent::DeliveryFailed {
            session_key,
            channel: channel_name,
            error: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutboundKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct MockChannel {
        name: String,
        running: Arc<AtomicBool>,
        allowlist: Vec<String>,
        sent: Arc<Mutex<Vec<OutboundMessage>>>,
        fail_sends: bool,
    }

    impl MockChannel {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                running: Arc::new(AtomicBool::new(false)),
                allowlist: Vec::new(),
                sent: Arc::new(Mutex::new(Vec::new())),
                fail_sends: false,
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&mut self) -> Result<()> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, msg: OutboundMessage) -> Result<()> {
            if self.fail_sends {
                return Err(ClawError::Channel("socket closed".into()));
            }
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn is_allowed(&self, sender_id: &str) -> bool {
            self.allowlist.is_empty() || self.allowlist.iter().any(|id| id == sender_id)
        }
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_admit_checks_allowlist() {
        let bus = MessageBus::new();
        let manager = ChannelManager::new(bus.clone());
        let mut channel = MockChannel::new("cli");
        channel.allowlist = vec!["alice".to_string()];
        manager.register(Box::new(channel)).await;
        let mut events = bus.subscribe_events();

        manager
            .admit(InboundMessage::new("cli", "alice", "c1", "hi"))
            .await
            .unwrap();
        assert_eq!(bus.inbound_len(), 1);

        let err = manager
            .admit(InboundMessage::new("cli", "mallory", "c1", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::SecurityViolation(_)));
        assert_eq!(bus.inbound_len(), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            BusEvent::Rejected {
                channel: "cli".to_string(),
                sender_id: "mallory".to_string()
            }
        );
        assert_eq!(bus.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_admit_unknown_channel() {
        let manager = ChannelManager::new(MessageBus::new());
        let err = manager
            .admit(InboundMessage::new("nowhere", "u", "c", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatcher_routes_by_channel() {
        let bus = MessageBus::new();
        let manager = ChannelManager::new(bus.clone());
        let channel = MockChannel::new("cli");
        let sent = Arc::clone(&channel.sent);
        let running = Arc::clone(&channel.running);
        manager.register(Box::new(channel)).await;

        manager.start_all().await.unwrap();
        assert!(running.load(Ordering::SeqCst));

        bus.publish_outbound(OutboundMessage::new("cli:c1", "cli", "c1", "hello"))
            .unwrap();
        wait_for(|| sent.lock().unwrap().len() == 1).await;
        assert_eq!(sent.lock().unwrap()[0].kind, OutboundKind::Final);

        manager.stop_all().await.unwrap();
        assert!(!running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_delivery_failure_emits_event() {
        let bus = MessageBus::new();
        let manager = ChannelManager::new(bus.clone());
        let mut channel = MockChannel::new("cli");
        channel.fail_sends = true;
        manager.register(Box::new(channel)).await;
        let mut events = bus.subscribe_events();

        manager.start_all().await.unwrap();
        bus.publish_outbound(OutboundMessage::new("cli:c1", "cli", "c1", "hello"))
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("x:c1", "missing", "c1", "hello"))
            .unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert!(matches!(first, BusEvent::DeliveryFailed { ref channel, .. } if channel == "cli"));
        assert!(
            matches!(second, BusEvent::DeliveryFailed { ref channel, .. } if channel == "missing")
        );
        assert_eq!(bus.stats().delivery_failures, 2);
        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_dispatcher() {
        let manager = ChannelManager::new(MessageBus::new());
        manager.register(Box::new(MockChannel::new("cli"))).await;
        manager.start_all().await.unwrap();
        manager.start_all().await.unwrap();
        assert_eq!(manager.channels().await, vec!["cli"]);
        assert!(manager.has_channel("cli").await);
        manager.stop_all().await.unwrap();
    }
}
