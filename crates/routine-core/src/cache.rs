//! Per-user rule cache.
//!
//! The cache is the authority for synchronous reads: callers render from the
//! snapshot it holds while remote persistence catches up asynchronously. It
//! is an injected value (no global state); owners decide its scope and
//! lifetime.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{is_canonical_id, RecurrenceRule};

#[derive(Debug, Default)]
pub struct RuleCache {
    inner: Mutex<HashMap<String, Vec<RecurrenceRule>>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the cached rules for a user.
    pub fn get(&self, user_id: &str) -> Vec<RecurrenceRule> {
        if let Ok(inner) = self.inner.lock() {
            inner.get(user_id).cloned().unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    /// Replaces the cached rule list for a user.
    pub fn set(&self, user_id: &str, rules: Vec<RecurrenceRule>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert(user_id.to_string(), rules);
        }
    }

    pub fn clear(&self, user_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(user_id);
        }
    }

    /// Inserts or replaces a single rule by id.
    pub fn upsert(&self, user_id: &str, rule: RecurrenceRule) {
        if let Ok(mut inner) = self.inner.lock() {
            let rules = inner.entry(user_id.to_string()).or_default();
            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
        }
    }

    /// Removes a rule by id; returns whether it was present.
    pub fn remove(&self, user_id: &str, rule_id: &str) -> bool {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(rules) = inner.get_mut(user_id) {
                let before = rules.len();
                rules.retain(|r| r.id != rule_id);
                return rules.len() < before;
            }
        }
        false
    }

    /// Finds a rule by id across all cached users. Used when a remote lookup
    /// misses but the rule may exist only locally (pending push).
    pub fn find_by_id(&self, rule_id: &str) -> Option<RecurrenceRule> {
        if let Ok(inner) = self.inner.lock() {
            for rules in inner.values() {
                if let Some(rule) = rules.iter().find(|r| r.id == rule_id) {
                    return Some(rule.clone());
                }
            }
        }
        None
    }

    /// Rules carrying a locally-generated (non-canonical) id, awaiting their
    /// first successful remote write.
    pub fn pending(&self, user_id: &str) -> Vec<RecurrenceRule> {
        self.get(user_id)
            .into_iter()
            .filter(|r| !is_canonical_id(&r.id))
            .collect()
    }

    /// Renames locally-generated ids to their server-assigned canonical ids.
    /// A rename, not a new entity: everything else on the rule is preserved.
    pub fn apply_remap(&self, user_id: &str, remap: &HashMap<String, String>) {
        if remap.is_empty() {
            return;
        }
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(rules) = inner.get_mut(user_id) {
                for rule in rules.iter_mut() {
                    if let Some(new_id) = remap.get(&rule.id) {
                        rule.id = new_id.clone();
                    }
                }
            }
        }
    }
}
