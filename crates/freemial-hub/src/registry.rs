//! Process-wide map of group id to [`Group`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::connection::Connection;
use crate::group::Group;

/// Registry of live groups.
///
/// A group is present iff it has at least one member. Lock order is always
/// registry map, then group state.
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Return the group for `group_id`, creating it if needed.
    ///
    /// Concurrent calls with the same id get the same instance.
    pub fn get_or_create(self: &Arc<Self>, group_id: &str) -> Arc<Group> {
        if let Some(group) = self.groups.read().get(group_id) {
            return Arc::clone(group);
        }
        let mut groups = self.groups.write();
        let group = groups.entry(group_id.to_owned()).or_insert_with(|| {
            debug!(group_id, "group created");
            Arc::new(Group::new(group_id, Arc::downgrade(self)))
        });
        Arc::clone(group)
    }

    /// Register `connection` with the group named by its group id.
    ///
    /// Retries when the group it found was retired between lookup and
    /// registration, so a connection never lands in an unreachable group.
    pub fn join(self: &Arc<Self>, connection: &Arc<Connection>) -> Arc<Group> {
        loop {
            let group = self.get_or_create(connection.group_id());
            if group.register(Arc::clone(connection)) {
                return group;
            }
            debug!(group_id = connection.group_id(), "group retired during join, retrying");
        }
    }

    /// Look up a group without creating it.
    pub fn get(&self, group_id: &str) -> Option<Arc<Group>> {
        self.groups.read().get(group_id).cloned()
    }

    /// Remove the entry for `group_id`. Deleting an absent id is a no-op.
    pub fn delete(&self, group_id: &str) {
        if self.groups.write().remove(group_id).is_some() {
            debug!(group_id, "group deleted");
        }
    }

    /// Remove `group` if it is still empty, retiring it.
    ///
    /// Only the exact instance is removed; a newer group under the same id
    /// is left alone.
    pub(crate) fn delete_if_empty(&self, group: &Group) {
        let mut groups = self.groups.write();
        if !group.retire_if_empty() {
            return;
        }
        let is_current = groups
            .get(group.id())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), group));
        if is_current {
            let _ = groups.remove(group.id());
            debug!(group_id = group.id(), "group emptied and deleted");
        }
    }

    /// Sorted snapshot of the live group ids.
    pub fn list_group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.groups.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Whether there are no live groups.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Total members across all groups.
    pub fn connection_count(&self) -> usize {
        let groups: Vec<Arc<Group>> = self.groups.read().values().cloned().collect();
        groups.iter().map(|group| group.len()).sum()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;

    #[test]
    fn new_registry_is_empty() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert!(registry.list_group_ids().is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn get_or_create_returns_same_instance() {
        let registry = Arc::new(Registry::new());
        let a = registry.get_or_create("new-channel");
        let b = registry.get_or_create("new-channel");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("new-channel").is_some_and(|g| Arc::ptr_eq(&g, &a)));
    }

    #[test]
    fn concurrent_get_or_create_single_instance() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("shared"))
            })
            .collect();
        let groups: Vec<Arc<Group>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(groups.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn delete_removes_and_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let _ = registry.get_or_create("new-channel");
        registry.delete("new-channel");
        assert!(registry.get("new-channel").is_none());
        registry.delete("new-channel");
        registry.delete("never-existed");
        assert!(registry.is_empty());
    }

    #[test]
    fn list_group_ids_is_sorted_snapshot() {
        let registry = Arc::new(Registry::new());
        for id in ["b", "c", "a"] {
            let _ = registry.get_or_create(id);
        }
        assert_eq!(registry.list_group_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn join_registers_and_last_leave_deletes() {
        let registry = Arc::new(Registry::new());
        let (conn, _rx) = Connection::new("dev-1", Role::Controller, 4);

        let group = registry.join(&conn);
        assert_eq!(group.controller_id(), Some(conn.id()));
        assert_eq!(registry.list_group_ids(), vec!["dev-1"]);
        assert_eq!(registry.connection_count(), 1);

        group.unregister(&conn);
        assert!(!registry.list_group_ids().contains(&"dev-1".to_owned()));
    }

    #[test]
    fn join_after_retirement_gets_fresh_group() {
        let registry = Arc::new(Registry::new());
        let (first, _rx1) = Connection::new("dev-1", Role::Peer, 4);
        let old = registry.join(&first);
        old.unregister(&first);
        assert!(old.is_retired());

        let (second, _rx2) = Connection::new("dev-1", Role::Peer, 4);
        let fresh = registry.join(&second);
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(fresh.contains(second.id()));
        assert!(registry.get("dev-1").is_some_and(|g| Arc::ptr_eq(&g, &fresh)));
    }

    #[test]
    fn stale_group_does_not_remove_newer_entry() {
        let registry = Arc::new(Registry::new());
        let (a, _rx1) = Connection::new("dev-1", Role::Peer, 4);
        let old = registry.join(&a);

        // Detach the populated group, then let a new one take its place.
        registry.delete("dev-1");
        let (b, _rx2) = Connection::new("dev-1", Role::Peer, 4);
        let fresh = registry.join(&b);
        assert!(!Arc::ptr_eq(&old, &fresh));

        old.unregister(&a);
        assert!(registry.get("dev-1").is_some_and(|g| Arc::ptr_eq(&g, &fresh)));
    }

    #[test]
    fn groups_are_independent() {
        let registry = Arc::new(Registry::new());
        let (a, _rx1) = Connection::new("dev-a", Role::Peer, 4);
        let (b, _rx2) = Connection::new("dev-b", Role::Peer, 4);
        let ga = registry.join(&a);
        let _gb = registry.join(&b);

        ga.unregister(&a);
        assert_eq!(registry.list_group_ids(), vec!["dev-b"]);
    }
}
