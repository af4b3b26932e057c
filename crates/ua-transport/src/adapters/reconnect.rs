//! Channel provider that keeps one channel open and re-establishes it on loss.

use crate::domain::ChannelError;
use crate::ports::{Channel, ChannelProvider, Connector};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Caches the current channel and reconnects when it reports closed.
///
/// Connects are serialised: callers arriving while a connect is in progress
/// wait for it and share the resulting channel rather than opening their own.
pub struct ReconnectingChannelProvider<C: Connector> {
    connector: C,
    current: Mutex<Option<C::Channel>>,
    connects: AtomicU64,
    reconnects: AtomicU64,
}

impl<C: Connector> ReconnectingChannelProvider<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
            connects: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Forget the cached channel; the next acquire connects again.
    pub async fn invalidate(&self) {
        self.current.lock().await.take();
    }

    /// Successful connects, including the first
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Connects that replaced a lost channel
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[async_trait]
impl<C: Connector> ChannelProvider for ReconnectingChannelProvider<C> {
    type Channel = C::Channel;

    async fn acquire(&self) -> Result<C::Channel, ChannelError> {
        let mut current = self.current.lock().await;

        if let Some(channel) = current.as_ref() {
            if channel.is_open() {
                return Ok(channel.clone());
            }
            debug!("Cached channel closed, reconnecting");
        }

        let replacing = current.take().is_some();
        let channel = self.connector.connect().await?;
        self.connects.fetch_add(1, Ordering::Relaxed);

        if replacing {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            info!(
                reconnects = self.reconnect_count(),
                "Channel re-established"
            );
        } else {
            debug!("Channel established");
        }

        *current = Some(channel.clone());
        Ok(channel)
    }
}
