//! Rule storage.
//!
//! The pipeline only needs [`RuleStore`]: a snapshot of the active rules per
//! request and a lookup by id. [`MemoryRuleStore`] is the in-process
//! implementation used by the binary and the tests.

use crate::model::{now_millis, SignRule};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Keyed rule lookup.
pub trait RuleStore: Send + Sync {
    /// Enabled, non-deleted rules, ordered by id.
    fn list_active_rules(&self) -> Vec<SignRule>;

    /// A non-deleted rule by id, enabled or not.
    fn get_rule_by_id(&self, id: u64) -> Option<SignRule>;
}

#[derive(Debug)]
struct StoredRule {
    rule: SignRule,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    rules: BTreeMap<u64, StoredRule>,
    next_id: u64,
}

impl Inner {
    fn live(&self) -> impl Iterator<Item = &SignRule> {
        self.rules.values().filter(|r| !r.deleted).map(|r| &r.rule)
    }

    fn live_mut(&mut self, id: u64) -> Result<&mut SignRule, StoreError> {
        self.rules
            .get_mut(&id)
            .filter(|r| !r.deleted)
            .map(|r| &mut r.rule)
            .ok_or(StoreError::NotFound(id))
    }

    fn name_taken(&self, name: &str, except: Option<u64>) -> bool {
        self.live().any(|r| r.name == name && Some(r.id) != except)
    }
}

/// In-memory rule store with soft deletion.
#[derive(Debug)]
pub struct MemoryRuleStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                rules: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Seed a store from configured rules.
    ///
    /// Rules keep an explicit id; rules without one (id 0) get the next free
    /// ids in order.
    pub fn from_rules(rules: Vec<SignRule>) -> Result<Self, StoreError> {
        let store = Self::new();
        let max_explicit = rules.iter().map(|r| r.id).max().unwrap_or(0);
        {
            let mut inner = store.inner.write();
            inner.next_id = max_explicit + 1;

            for mut rule in rules {
                validate(&rule)?;
                if inner.name_taken(&rule.name, None) {
                    return Err(StoreError::DuplicateName(rule.name));
                }
                if rule.id == 0 {
                    rule.id = inner.next_id;
                    inner.next_id += 1;
                } else if inner.rules.contains_key(&rule.id) {
                    return Err(StoreError::DuplicateId(rule.id));
                }
                inner.rules.insert(rule.id, StoredRule { rule, deleted: false });
            }
        }
        Ok(store)
    }

    /// Add a rule and return its assigned id. Names must be unique.
    pub fn insert(&self, mut rule: SignRule) -> Result<u64, StoreError> {
        validate(&rule)?;
        let mut inner = self.inner.write();
        if inner.name_taken(&rule.name, None) {
            return Err(StoreError::DuplicateName(rule.name));
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let now = now_millis();
        rule.id = id;
        rule.created_at = now;
        rule.updated_at = now;
        inner.rules.insert(id, StoredRule { rule, deleted: false });
        Ok(id)
    }

    /// Replace the editable fields of a rule.
    pub fn update(&self, id: u64, rule: SignRule) -> Result<(), StoreError> {
        validate(&rule)?;
        let mut inner = self.inner.write();
        if inner.name_taken(&rule.name, Some(id)) {
            return Err(StoreError::DuplicateName(rule.name));
        }

        let stored = inner.live_mut(id)?;
        stored.name = rule.name;
        stored.filter = rule.filter;
        stored.content = rule.content;
        stored.enabled = rule.enabled;
        stored.kind = rule.kind;
        stored.tool_flag = rule.tool_flag;
        stored.updated_at = now_millis();
        Ok(())
    }

    /// Soft-delete a rule. It disappears from every listing and lookup.
    pub fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let stored = inner
            .rules
            .get_mut(&id)
            .filter(|r| !r.deleted)
            .ok_or(StoreError::NotFound(id))?;
        stored.deleted = true;
        stored.rule.updated_at = now_millis();
        Ok(())
    }

    /// Enable or disable a rule.
    pub fn set_enabled(&self, id: u64, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let stored = inner.live_mut(id)?;
        stored.enabled = enabled;
        stored.updated_at = now_millis();
        Ok(())
    }

    /// Non-deleted rules, optionally filtered by a name substring.
    pub fn list(&self, name_filter: Option<&str>) -> Vec<SignRule> {
        let inner = self.inner.read();
        let filter = name_filter.map(str::trim).filter(|f| !f.is_empty());
        inner
            .live()
            .filter(|r| filter.map_or(true, |f| r.name.contains(f)))
            .cloned()
            .collect()
    }

    /// Number of non-deleted rules.
    pub fn len(&self) -> usize {
        self.inner.read().live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleStore for MemoryRuleStore {
    fn list_active_rules(&self) -> Vec<SignRule> {
        let inner = self.inner.read();
        inner.live().filter(|r| r.enabled).cloned().collect()
    }

    fn get_rule_by_id(&self, id: u64) -> Option<SignRule> {
        let inner = self.inner.read();
        let found = inner.live().find(|r| r.id == id).cloned();
        found
    }
}

fn validate(rule: &SignRule) -> Result<(), StoreError> {
    if rule.name.trim().is_empty() {
        return Err(StoreError::Invalid("name is required".to_string()));
    }
    if rule.content.trim().is_empty() {
        return Err(StoreError::Invalid("content is required".to_string()));
    }
    Ok(())
}

/// Errors returned by rule store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Rule name '{0}' already exists")]
    DuplicateName(String),

    #[error("Rule id {0} is used more than once")]
    DuplicateId(u64),

    #[error("Rule {0} does not exist")]
    NotFound(u64),

    #[error("Invalid rule: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolFlag;

    fn rule(name: &str) -> SignRule {
        SignRule::script(name, ".*", "fn main() { [] }", ToolFlag::PROXY)
    }

    #[test]
    fn test_insert_assigns_ids_and_rejects_duplicates() {
        let store = MemoryRuleStore::new();
        assert_eq!(store.insert(rule("a")).unwrap(), 1);
        assert_eq!(store.insert(rule("b")).unwrap(), 2);
        assert!(matches!(store.insert(rule("a")), Err(StoreError::DuplicateName(_))));
        assert!(matches!(store.insert(rule(" ")), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_soft_delete() {
        let store = MemoryRuleStore::new();
        let id = store.insert(rule("a")).unwrap();
        store.delete(id).unwrap();

        assert!(store.get_rule_by_id(id).is_none());
        assert!(store.list(None).is_empty());
        assert!(matches!(store.delete(id), Err(StoreError::NotFound(_))));
        // The name is free again once deleted
        assert!(store.insert(rule("a")).is_ok());
    }

    #[test]
    fn test_enable_toggle() {
        let store = MemoryRuleStore::new();
        let id = store.insert(rule("a")).unwrap();
        store.set_enabled(id, false).unwrap();

        assert!(store.list_active_rules().is_empty());
        assert!(!store.get_rule_by_id(id).unwrap().enabled);
        assert!(matches!(store.set_enabled(99, true), Err(StoreError::NotFound(99))));
    }

    #[test]
    fn test_update() {
        let store = MemoryRuleStore::new();
        let a = store.insert(rule("a")).unwrap();
        store.insert(rule("b")).unwrap();

        let mut changed = rule("a2");
        changed.filter = "example".to_string();
        store.update(a, changed).unwrap();
        let updated = store.get_rule_by_id(a).unwrap();
        assert_eq!(updated.name, "a2");
        assert_eq!(updated.filter, "example");
        assert_eq!(updated.id, a);

        assert!(matches!(store.update(a, rule("b")), Err(StoreError::DuplicateName(_))));
        assert!(matches!(store.update(42, rule("z")), Err(StoreError::NotFound(42))));
    }

    #[test]
    fn test_list_name_filter() {
        let store = MemoryRuleStore::new();
        store.insert(rule("api-sign")).unwrap();
        store.insert(rule("web-sign")).unwrap();
        store.insert(rule("api-token")).unwrap();

        let names: Vec<_> = store.list(Some("api")).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["api-sign", "api-token"]);
        assert_eq!(store.list(Some("")).len(), 3);
    }

    #[test]
    fn test_from_rules_id_assignment() {
        let mut explicit = rule("explicit");
        explicit.id = 5;
        let store =
            MemoryRuleStore::from_rules(vec![rule("first"), explicit, rule("second")]).unwrap();

        let ids: Vec<_> = store.list(None).into_iter().map(|r| (r.id, r.name)).collect();
        assert_eq!(
            ids,
            vec![
                (5, "explicit".to_string()),
                (6, "first".to_string()),
                (7, "second".to_string()),
            ]
        );

        let mut dup = rule("dup");
        dup.id = 5;
        let mut other = rule("other");
        other.id = 5;
        assert!(matches!(
            MemoryRuleStore::from_rules(vec![dup, other]),
            Err(StoreError::DuplicateId(5))
        ));
    }
}
