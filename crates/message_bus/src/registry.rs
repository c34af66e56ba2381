//! Message-type to subscriber-set registry.
//!
//! Each type's membership set sits behind its own lock, so subscriptions to
//! unrelated types never contend. Fan-out takes a read lock on the one set it
//! needs and sees snapshot-consistent membership for that delivery.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

type MemberSet = Arc<RwLock<BTreeSet<String>>>;

#[derive(Debug, Default)]
pub(crate) struct SubscriberRegistry {
    sets: DashMap<String, MemberSet>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module to a type's set. Returns true when the module is the
    /// first subscriber for the type.
    pub fn subscribe(&self, message_type: &str, module: &str) -> bool {
        let set = self
            .sets
            .entry(message_type.to_string())
            .or_default()
            .clone();
        let mut members = set.write().expect("subscriber set lock poisoned");
        let was_empty = members.is_empty();
        members.insert(module.to_string());
        was_empty
    }

    /// Removes a module from a type's set. Returns true when the set became
    /// empty (module was the last unsubscriber).
    pub fn unsubscribe(&self, message_type: &str, module: &str) -> bool {
        let Some(set) = self.sets.get(message_type).map(|s| s.clone()) else {
            return false;
        };
        let mut members = set.write().expect("subscriber set lock poisoned");
        members.remove(module) && members.is_empty()
    }

    /// Membership snapshot for one delivery fan-out.
    pub fn snapshot(&self, message_type: &str) -> Vec<String> {
        match self.sets.get(message_type) {
            Some(set) => set
                .read()
                .expect("subscriber set lock poisoned")
                .iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drops a module from every set it appears in; returns the types whose
    /// sets became empty as a result.
    pub fn remove_module(&self, module: &str) -> Vec<String> {
        let mut emptied = Vec::new();
        for entry in self.sets.iter() {
            let mut members = entry.value().write().expect("subscriber set lock poisoned");
            if members.remove(module) && members.is_empty() {
                emptied.push(entry.key().clone());
            }
        }
        emptied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_and_last_membership_transitions() {
        let registry = SubscriberRegistry::new();
        assert!(registry.subscribe("t.alpha", "m1"));
        assert!(!registry.subscribe("t.alpha", "m2"));

        assert!(!registry.unsubscribe("t.alpha", "m1"));
        assert!(registry.unsubscribe("t.alpha", "m2"));
        assert!(!registry.unsubscribe("t.alpha", "m2"));
    }

    #[test]
    fn snapshot_reflects_current_membership() {
        let registry = SubscriberRegistry::new();
        registry.subscribe("t.beta", "m2");
        registry.subscribe("t.beta", "m1");

        assert_eq!(registry.snapshot("t.beta"), vec!["m1", "m2"]);
        assert!(registry.snapshot("t.unknown").is_empty());
    }

    #[test]
    fn remove_module_reports_emptied_types() {
        let registry = SubscriberRegistry::new();
        registry.subscribe("t.solo", "m1");
        registry.subscribe("t.shared", "m1");
        registry.subscribe("t.shared", "m2");

        let mut emptied = registry.remove_module("m1");
        emptied.sort();
        assert_eq!(emptied, vec!["t.solo"]);
        assert_eq!(registry.snapshot("t.shared"), vec!["m2"]);
    }
}
