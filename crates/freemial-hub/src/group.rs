//! A group of connections sharing one device id.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionId};
use crate::registry::Registry;
use crate::router::{self, RouteOutcome};

/// Connections that share a device id, plus the designated controller.
///
/// The controller is stored as an id into the member map, so removing the
/// member always invalidates it.
pub struct Group {
    id: String,
    registry: Weak<Registry>,
    state: RwLock<GroupState>,
}

#[derive(Default)]
struct GroupState {
    members: HashMap<ConnectionId, Arc<Connection>>,
    controller: Option<ConnectionId>,
    /// Set once the group emptied and was removed from the registry.
    retired: bool,
}

impl Group {
    pub(crate) fn new(id: impl Into<String>, registry: Weak<Registry>) -> Self {
        Self {
            id: id.into(),
            registry,
            state: RwLock::new(GroupState::default()),
        }
    }

    /// Group id (the device id).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a connection to the group.
    ///
    /// A controller connection becomes the group's controller, replacing any
    /// previous one. The previous controller stays a plain member and its
    /// connection is left open.
    ///
    /// Returns `false` if the group was retired in the meantime; the caller
    /// must resolve a fresh group from the registry.
    pub fn register(&self, connection: Arc<Connection>) -> bool {
        let mut state = self.state.write();
        if state.retired {
            return false;
        }
        let id = connection.id();
        if connection.role().is_controller() {
            if let Some(previous) = state.controller.replace(id) {
                if previous != id {
                    info!(group_id = %self.id, previous = %previous, conn_id = %id, "controller replaced");
                }
            }
        }
        let _ = state.members.insert(id, connection);
        debug!(group_id = %self.id, conn_id = %id, members = state.members.len(), "connection registered");
        true
    }

    /// Remove a connection and close its delivery queue.
    ///
    /// Idempotent. Safe to call from the connection's own teardown and from
    /// another connection's routing call at the same time. Deletes the group
    /// from the registry when the last member leaves.
    pub fn unregister(&self, connection: &Connection) {
        let id = connection.id();
        let emptied = {
            let mut state = self.state.write();
            let removed = state.members.remove(&id).is_some();
            if state.controller == Some(id) {
                state.controller = None;
            }
            if removed {
                debug!(group_id = %self.id, conn_id = %id, members = state.members.len(), "connection unregistered");
            }
            removed && state.members.is_empty()
        };

        let _ = connection.close();

        if emptied {
            if let Some(registry) = self.registry.upgrade() {
                registry.delete_if_empty(self);
            }
        }
    }

    /// Route one inbound payload from `sender`.
    ///
    /// Never blocks on slow consumers; see [`router`].
    pub fn route(&self, sender: &Arc<Connection>, raw: &str) -> RouteOutcome {
        router::route(self, sender, raw)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.state.read().members.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.state.read().members.is_empty()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.read().members.contains_key(&id)
    }

    /// Id of the current controller, if any.
    pub fn controller_id(&self) -> Option<ConnectionId> {
        self.state.read().controller
    }

    /// Whether the group has been retired.
    pub fn is_retired(&self) -> bool {
        self.state.read().retired
    }

    /// Current controller connection, if any.
    pub(crate) fn controller(&self) -> Option<Arc<Connection>> {
        let state = self.state.read();
        state
            .controller
            .and_then(|id| state.members.get(&id))
            .cloned()
    }

    /// Snapshot of every member except `exclude`.
    pub(crate) fn members_except(&self, exclude: ConnectionId) -> Vec<Arc<Connection>> {
        self.state
            .read()
            .members
            .iter()
            .filter(|(id, _)| **id != exclude)
            .map(|(_, conn)| Arc::clone(conn))
            .collect()
    }

    /// Mark the group retired if it is still empty.
    ///
    /// Called by the registry while it holds its map lock.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let mut state = self.state.write();
        if state.members.is_empty() {
            state.retired = true;
        }
        state.retired
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("members", &state.members.len())
            .field("controller", &state.controller)
            .field("retired", &state.retired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::connection::Role;

    fn setup(group_id: &str) -> (Arc<Registry>, Arc<Group>) {
        let registry = Arc::new(Registry::new());
        let group = registry.get_or_create(group_id);
        (registry, group)
    }

    #[test]
    fn register_controller_and_peer() {
        let (_registry, group) = setup("chan1");
        let (controller, _rx1) = Connection::new("chan1", Role::Controller, 4);
        let (peer, _rx2) = Connection::new("chan1", Role::Peer, 4);

        assert!(group.register(Arc::clone(&controller)));
        assert!(group.register(Arc::clone(&peer)));

        assert_eq!(group.len(), 2);
        assert_eq!(group.controller_id(), Some(controller.id()));
        assert!(group.contains(peer.id()));
    }

    #[test]
    fn second_controller_replaces_first() {
        let (_registry, group) = setup("chan1");
        let (first, _rx1) = Connection::new("chan1", Role::Controller, 4);
        let (second, _rx2) = Connection::new("chan1", Role::Controller, 4);

        let _ = group.register(Arc::clone(&first));
        let _ = group.register(Arc::clone(&second));

        assert_eq!(group.controller_id(), Some(second.id()));
        assert!(group.contains(first.id()));
        assert!(!first.is_closed(), "replaced controller stays connected");
    }

    #[test]
    fn register_same_connection_twice_is_one_member() {
        let (_registry, group) = setup("chan1");
        let (conn, _rx) = Connection::new("chan1", Role::Peer, 4);
        let _ = group.register(Arc::clone(&conn));
        let _ = group.register(Arc::clone(&conn));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn unregister_closes_queue_and_clears_controller() {
        let (_registry, group) = setup("chan1");
        let (controller, _rx1) = Connection::new("chan1", Role::Controller, 4);
        let (peer, _rx2) = Connection::new("chan1", Role::Peer, 4);
        let _ = group.register(Arc::clone(&controller));
        let _ = group.register(Arc::clone(&peer));

        group.unregister(&controller);

        assert!(controller.is_closed());
        assert_eq!(group.controller_id(), None);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let (_registry, group) = setup("chan1");
        let (a, _rx1) = Connection::new("chan1", Role::Peer, 4);
        let (b, _rx2) = Connection::new("chan1", Role::Peer, 4);
        let _ = group.register(Arc::clone(&a));
        let _ = group.register(Arc::clone(&b));

        group.unregister(&a);
        group.unregister(&a);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn unregister_non_member_still_closes_queue() {
        let (_registry, group) = setup("chan1");
        let (member, _rx1) = Connection::new("chan1", Role::Peer, 4);
        let (stranger, _rx2) = Connection::new("chan1", Role::Peer, 4);
        let _ = group.register(Arc::clone(&member));

        group.unregister(&stranger);
        assert!(stranger.is_closed());
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn last_unregister_deletes_group_from_registry() {
        let (registry, group) = setup("test-channel");
        let (conn, _rx) = Connection::new("test-channel", Role::Peer, 1);
        let _ = group.register(Arc::clone(&conn));

        group.unregister(&conn);

        assert!(group.is_empty());
        assert!(group.is_retired());
        assert!(registry.list_group_ids().is_empty());
    }

    #[test]
    fn retired_group_rejects_registration() {
        let (_registry, group) = setup("chan1");
        let (a, _rx1) = Connection::new("chan1", Role::Peer, 4);
        let _ = group.register(Arc::clone(&a));
        group.unregister(&a);

        let (b, _rx2) = Connection::new("chan1", Role::Peer, 4);
        assert!(!group.register(b));
    }

    #[test]
    fn members_except_excludes_sender() {
        let (_registry, group) = setup("chan1");
        let (a, _rx1) = Connection::new("chan1", Role::Controller, 4);
        let (b, _rx2) = Connection::new("chan1", Role::Peer, 4);
        let (c, _rx3) = Connection::new("chan1", Role::Peer, 4);
        for conn in [&a, &b, &c] {
            let _ = group.register(Arc::clone(conn));
        }

        let others = group.members_except(a.id());
        assert_eq!(others.len(), 2);
        assert!(others.iter().all(|conn| conn.id() != a.id()));
    }

    #[test]
    fn controller_lookup_follows_membership() {
        let (_registry, group) = setup("chan1");
        assert!(group.controller().is_none());
        let (c, _rx) = Connection::new("chan1", Role::Controller, 4);
        let (p, _rx2) = Connection::new("chan1", Role::Peer, 4);
        let _ = group.register(Arc::clone(&c));
        let _ = group.register(Arc::clone(&p));
        assert_eq!(group.controller().map(|conn| conn.id()), Some(c.id()));
        group.unregister(&c);
        assert!(group.controller().is_none());
    }

    #[test]
    fn self_teardown_racing_eviction_removes_member_once() {
        const STATUS: &str = r#"{"op":"deviceStatus","senderId":"c","content":{}}"#;

        for _ in 0..200 {
            let registry = Arc::new(Registry::new());
            let (controller, _crx) = Connection::new("race", Role::Controller, 8);
            let (slow, _srx) = Connection::new("race", Role::Peer, 1);
            let group = registry.join(&controller);
            let _ = registry.join(&slow);

            // Fill the peer's queue so the next broadcast evicts it.
            let _ = group.route(&controller, STATUS);
            let barrier = Barrier::new(2);

            let outcome = std::thread::scope(|scope| {
                let _ = scope.spawn(|| {
                    let _ = barrier.wait();
                    group.unregister(&slow);
                });
                let router = scope.spawn(|| {
                    let _ = barrier.wait();
                    group.route(&controller, STATUS)
                });
                router.join().unwrap()
            });

            match outcome {
                RouteOutcome::Delivered { recipients: 0, evicted } => assert!(evicted <= 1),
                other => panic!("unexpected outcome {other:?}"),
            }
            assert!(slow.is_closed());
            assert!(!group.contains(slow.id()));
            assert_eq!(group.len(), 1);
            assert_eq!(registry.connection_count(), 1);

            group.unregister(&controller);
            assert!(registry.is_empty());
            assert!(group.is_retired());
        }
    }
}
