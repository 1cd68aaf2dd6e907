//! Reference-counted channel subscriptions.
//!
//! The registry is the set of channels the caller wants to be in, whether or
//! not a connection currently exists. It decides when a `JOIN`/`PART` has to
//! go out on the wire and replays every channel after a handshake.

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::{ChatListener, same_listener};

/// Canonical channel key: trimmed, no leading `#`, lowercase.
pub fn canonical_channel(channel: &str) -> String {
    let channel = channel.trim();
    channel.strip_prefix('#').unwrap_or(channel).to_lowercase()
}

struct Subscription {
    ref_count: usize,
    listeners: Vec<Arc<dyn ChatListener>>,
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Subscription>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more interested caller. Returns `true` when this is the
    /// first one, i.e. a `JOIN` must be sent.
    pub fn join(&mut self, channel: &str, listener: Arc<dyn ChatListener>) -> bool {
        let sub = self
            .channels
            .entry(canonical_channel(channel))
            .or_insert_with(|| Subscription {
                ref_count: 0,
                listeners: Vec::new(),
            });
        if !sub.listeners.iter().any(|l| same_listener(l, &listener)) {
            sub.listeners.push(listener);
        }
        sub.ref_count += 1;
        sub.ref_count == 1
    }

    /// Drop one interested caller. Returns `true` when that was the last one,
    /// i.e. a `PART` must be sent. Unknown channels are ignored.
    pub fn leave(&mut self, channel: &str, listener: &Arc<dyn ChatListener>) -> bool {
        let key = canonical_channel(channel);
        let Some(sub) = self.channels.get_mut(&key) else {
            return false;
        };
        sub.listeners.retain(|l| !same_listener(l, listener));
        sub.ref_count -= 1;
        if sub.ref_count > 0 {
            return false;
        }
        self.channels.remove(&key);
        true
    }

    /// Listeners for `channel` in registration order.
    pub fn listeners(&self, channel: &str) -> Vec<Arc<dyn ChatListener>> {
        self.channels
            .get(&canonical_channel(channel))
            .map(|sub| sub.listeners.clone())
            .unwrap_or_default()
    }

    pub fn ref_count(&self, channel: &str) -> usize {
        self.channels
            .get(&canonical_channel(channel))
            .map_or(0, |sub| sub.ref_count)
    }

    /// Every tracked channel, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
