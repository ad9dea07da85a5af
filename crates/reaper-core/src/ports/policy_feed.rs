//! Policy feed: ordered create/update/delete notifications from the policy store.

use tokio::sync::mpsc;

use crate::domain::ReaperPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    /// Created or updated.
    Upserted(ReaperPolicy),
    /// Deleted, by name.
    Deleted(String),
}

impl PolicyEvent {
    pub fn policy_name(&self) -> &str {
        match self {
            PolicyEvent::Upserted(policy) => &policy.name,
            PolicyEvent::Deleted(name) => name,
        }
    }
}

pub type PolicyFeed = mpsc::Receiver<PolicyEvent>;
pub type PolicyFeedSender = mpsc::Sender<PolicyEvent>;

/// Create a bounded feed. The store side keeps the sender.
pub fn policy_feed(capacity: usize) -> (PolicyFeedSender, PolicyFeed) {
    mpsc::channel(capacity)
}
