//! Sequential update queue
//!
//! Mods with a pending update are queued by identity and handed out one at
//! a time to a single [`UpdateProcessor`].

pub mod processor;
pub mod state;

pub use processor::UpdateProcessor;
pub use state::{QueueSummary, UpdateOutcome};

use crate::db::ModRecord;
use std::collections::VecDeque;

/// Identities waiting for an update, in display order
#[derive(Debug, Default, Clone)]
pub struct UpdateQueue {
    pending: VecDeque<String>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue every record that has an update, keeping the given order
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ModRecord>) -> Self {
        let pending = records
            .into_iter()
            .filter(|r| r.has_update())
            .map(|r| r.identity.clone())
            .collect();
        Self { pending }
    }

    /// Add an identity unless it is already waiting
    pub fn push(&mut self, identity: impl Into<String>) -> bool {
        let identity = identity.into();
        if self.pending.contains(&identity) {
            return false;
        }
        self.pending.push_back(identity);
        true
    }

    /// Take the next identity to process
    pub fn next(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    pub fn remove(&mut self, identity: &str) {
        self.pending.retain(|id| id != identity);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identity: &str, version: &str, latest: Option<&str>) -> ModRecord {
        let mut r = ModRecord::new(identity, format!("/mods/{}", identity));
        r.version = version.into();
        r.latest_version = latest.map(String::from);
        r
    }

    #[test]
    fn only_records_with_updates_are_queued() {
        let records = vec![
            record("a", "1.0", Some("1.1")),
            record("b", "1.0", Some("1.0")),
            record("c", "1.0", None),
            record("d", "2.0", Some("3.0")),
        ];

        let mut queue = UpdateQueue::from_records(&records);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().as_deref(), Some("a"));
        assert_eq!(queue.next().as_deref(), Some("d"));
        assert_eq!(queue.next(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn push_ignores_duplicates() {
        let mut queue = UpdateQueue::new();
        assert!(queue.push("a"));
        assert!(queue.push("b"));
        assert!(!queue.push("a"));
        queue.remove("a");
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec!["b"]);
    }
}
