// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction
//!
//! The subscription manager talks to the pub/sub transport through the
//! [`Transport`] trait, so the ingestion core never depends on a concrete
//! broker client. Delivery contract: at-least-once, unordered, duplicates
//! possible.
//!
//! [`ChannelTransport`] is the in-process loopback implementation used by
//! tests and the service binary's simulation mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// A payload delivered by the transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the payload was published on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

/// Transport failure taxonomy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Operation requires an established connection
    #[error("transport is not connected")]
    NotConnected,

    /// The connection went away
    #[error("transport connection closed")]
    ConnectionClosed,

    /// Subscription could not be established
    #[error("subscription failed: {0}")]
    Subscribe(String),
}

/// Abstract pub/sub transport
///
/// Implementations own the broker connection; the subscription manager
/// owns the lifecycle calls.
pub trait Transport: Send + Sync {
    /// Establish the connection
    fn connect(&self) -> Result<(), TransportError>;

    /// Subscribe to topics matching the filters
    ///
    /// Filters use MQTT-style wildcards: `#` matches any number of levels,
    /// `+` matches exactly one. Returns the channel deliveries arrive on.
    fn subscribe(
        &self,
        filters: &[String],
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError>;

    /// Tear down the connection
    fn disconnect(&self) -> Result<(), TransportError>;
}

struct Subscription {
    filters: Vec<String>,
    tx: mpsc::Sender<InboundMessage>,
}

/// In-process loopback transport
///
/// Publishers and subscribers share the process; `publish` fans out to
/// every subscription whose filters match and awaits channel capacity
/// rather than dropping (at-least-once, no silent loss).
pub struct ChannelTransport {
    connected: AtomicBool,
    capacity: usize,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ChannelTransport {
    /// Create a transport with the given per-subscription queue capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            connected: AtomicBool::new(false),
            capacity: capacity.max(1),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Publish a payload to all matching subscriptions
    ///
    /// Waits for queue capacity; a subscription whose receiver is gone is
    /// pruned, not an error.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let targets: Vec<mpsc::Sender<InboundMessage>> = {
            let subscriptions = match self.subscriptions.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subscriptions
                .iter()
                .filter(|s| s.filters.iter().any(|f| topic_matches(f, topic)))
                .map(|s| s.tx.clone())
                .collect()
        };

        for tx in targets {
            let message = InboundMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if tx.send(message).await.is_err() {
                tracing::debug!("Subscription for '{}' has gone away", topic);
            }
        }

        let mut subscriptions = match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscriptions.retain(|s| !s.tx.is_closed());

        Ok(())
    }

    /// True once `connect` has been called (and `disconnect` has not)
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        let subscriptions = match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscriptions.len()
    }
}

impl Transport for ChannelTransport {
    fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(
        &self,
        filters: &[String],
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if filters.is_empty() {
            return Err(TransportError::Subscribe(
                "no topic filters given".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.capacity);

        let mut subscriptions = match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscriptions.push(Subscription {
            filters: filters.to_vec(),
            tx,
        });

        Ok(rx)
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);

        let mut subscriptions = match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscriptions.clear();

        Ok(())
    }
}

/// Check if a topic matches an MQTT-style filter
///
/// `#` matches the remainder of the topic (including none),
/// `+` matches exactly one level.
pub(crate) fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
