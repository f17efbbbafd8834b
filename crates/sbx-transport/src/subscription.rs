//! Tracks which channels the caller intends to be subscribed to, independent
//! of the current socket's lifetime, so a reconnect can resend `subscribe`
//! frames for all of them, in the order they were first subscribed
//! (`spec.md` §4.2, §8 testable property #3 — resubscription must replay in
//! insertion order).

use std::collections::HashSet;

/// An insertion-ordered set of channel names. A plain `HashSet` would not
/// preserve the order property #3 requires, so membership is tracked
/// alongside an ordered `Vec`.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this channel wasn't already tracked.
    pub fn add(&mut self, channel: impl Into<String>) -> bool {
        let channel = channel.into();
        if self.members.insert(channel.clone()) {
            self.order.push(channel);
            true
        } else {
            false
        }
    }

    /// Returns `true` if this channel was tracked.
    pub fn remove(&mut self, channel: &str) -> bool {
        if self.members.remove(channel) {
            self.order.retain(|c| c != channel);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.members.contains(channel)
    }

    /// Tracked channels in insertion order (earliest-subscribed first).
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
