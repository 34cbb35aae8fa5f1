//! # Room Graph
//!
//! The persisted, editable description of rooms and the one-way portals
//! between them.
//!
//! Portals always exist in pairs: `A -> B` stores the token of `B -> A` as its
//! reverse and vice versa. Every editing operation keeps the pairing intact;
//! [`RoomGraph::validate`] rejects anything loaded from disk that does not.
//!
//! The order of a room's portal list is the order portals were created in.
//! The layer BFS visits neighbours in that order, so it is persisted as-is.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut graph = RoomGraph::new();
//! let hall = graph.add_room("Hall");
//! let study = graph.add_room("Study");
//! let (into_study, back_to_hall) = graph.create_portal_pair(hall, study)?;
//! graph.set_start_room(hall)?;
//!
//! for event in graph.drain_events() {
//!     // spawn or despawn portal renderers
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use quantum_shared::{PortalId, RoomId};

use crate::error::{GraphError, GraphResult};

/// A persisted room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Stable token.
    pub id: RoomId,
    /// Human-readable name.
    pub name: String,
    /// Outgoing portals in creation order.
    #[serde(default)]
    pub portals: Vec<PortalId>,
}

/// A persisted one-way portal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalRecord {
    /// Stable token.
    pub id: PortalId,
    /// Room the portal sits in.
    pub source: RoomId,
    /// Room the portal looks into.
    pub target: RoomId,
    /// The paired portal going the other way.
    pub reverse: PortalId,
}

/// Portal lifecycle notification raised by graph edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalEvent {
    /// A portal was created.
    Added {
        /// Room owning the portal.
        room: RoomId,
        /// New portal.
        portal: PortalId,
        /// Its reverse.
        reverse: PortalId,
    },
    /// A portal is about to disappear.
    Removed {
        /// Room owning the portal.
        room: RoomId,
        /// Removed portal.
        portal: PortalId,
        /// Its reverse at the time of removal.
        reverse: PortalId,
    },
}

/// Editable room/portal graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomGraph {
    /// Room the viewpoint starts in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_room: Option<RoomId>,
    /// Rooms in creation order.
    #[serde(default)]
    rooms: Vec<RoomRecord>,
    /// Portals in creation order.
    #[serde(default)]
    portals: Vec<PortalRecord>,
    /// Portal notifications not yet drained.
    #[serde(skip)]
    pending_events: Vec<PortalEvent>,
}

impl RoomGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Loading / saving
    // =========================================================================

    /// Parses and validates a graph from TOML.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed text, or the first validation error.
    pub fn from_toml_str(text: &str) -> GraphResult<Self> {
        let graph: Self = toml::from_str(text).map_err(|e| GraphError::Parse(e.to_string()))?;
        graph.validate()?;
        Ok(graph)
    }

    /// Reads, parses and validates a graph file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as [`Self::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> GraphResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GraphError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&text)
    }

    /// Serializes the graph to TOML.
    ///
    /// # Errors
    ///
    /// Returns `Serialize` if encoding fails.
    pub fn to_toml_string(&self) -> GraphResult<String> {
        toml::to_string_pretty(self).map_err(|e| GraphError::Serialize(e.to_string()))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Room the viewpoint starts in, if set.
    #[must_use]
    pub const fn start_room(&self) -> Option<RoomId> {
        self.start_room
    }

    /// All rooms in creation order.
    #[must_use]
    pub fn rooms(&self) -> &[RoomRecord] {
        &self.rooms
    }

    /// All portals in creation order.
    #[must_use]
    pub fn portals(&self) -> &[PortalRecord] {
        &self.portals
    }

    /// Looks up a room.
    #[must_use]
    pub fn room(&self, id: RoomId) -> Option<&RoomRecord> {
        self.rooms.iter().find(|room| room.id == id)
    }

    /// Looks up a room by name.
    #[must_use]
    pub fn room_by_name(&self, name: &str) -> Option<&RoomRecord> {
        self.rooms.iter().find(|room| room.name == name)
    }

    /// Looks up a portal.
    #[must_use]
    pub fn portal(&self, id: PortalId) -> Option<&PortalRecord> {
        self.portals.iter().find(|portal| portal.id == id)
    }

    /// Portal from `from` into `to`, if the rooms are linked.
    #[must_use]
    pub fn portal_between(&self, from: RoomId, to: RoomId) -> Option<&PortalRecord> {
        self.portals
            .iter()
            .find(|portal| portal.source == from && portal.target == to)
    }

    /// Number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of one-way portals (twice the number of pairs).
    #[must_use]
    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }

    /// Takes every portal notification raised since the last drain.
    pub fn drain_events(&mut self) -> Vec<PortalEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // =========================================================================
    // Room editing
    // =========================================================================

    /// Adds a room with a fresh token.
    pub fn add_room(&mut self, name: impl Into<String>) -> RoomId {
        let id = RoomId::generate();
        self.rooms.push(RoomRecord {
            id,
            name: name.into(),
            portals: Vec::new(),
        });
        id
    }

    /// Adds a room with a caller-chosen token.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRoom` if the token is taken.
    pub fn insert_room(&mut self, id: RoomId, name: impl Into<String>) -> GraphResult<()> {
        if self.room(id).is_some() {
            return Err(GraphError::DuplicateRoom(id));
        }
        self.rooms.push(RoomRecord {
            id,
            name: name.into(),
            portals: Vec::new(),
        });
        Ok(())
    }

    /// Renames a room.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` if the room does not exist.
    pub fn rename_room(&mut self, id: RoomId, name: impl Into<String>) -> GraphResult<()> {
        let room = self.room_mut(id)?;
        room.name = name.into();
        Ok(())
    }

    /// Removes a room together with every portal pair touching it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` if the room does not exist.
    pub fn remove_room(&mut self, id: RoomId) -> GraphResult<()> {
        if self.room(id).is_none() {
            return Err(GraphError::UnknownRoom(id));
        }

        let outgoing: Vec<PortalId> = self
            .portals
            .iter()
            .filter(|portal| portal.source == id)
            .map(|portal| portal.id)
            .collect();
        for portal in outgoing {
            // an earlier deletion may already have taken this one as a reverse
            if self.portal(portal).is_some() {
                self.delete_portal(portal)?;
            }
        }

        self.rooms.retain(|room| room.id != id);
        if self.start_room == Some(id) {
            self.start_room = None;
        }
        Ok(())
    }

    /// Sets the room the viewpoint starts in.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` if the room does not exist.
    pub fn set_start_room(&mut self, id: RoomId) -> GraphResult<()> {
        if self.room(id).is_none() {
            return Err(GraphError::UnknownRoom(id));
        }
        self.start_room = Some(id);
        Ok(())
    }

    // =========================================================================
    // Portal editing
    // =========================================================================

    /// Links two rooms with a fresh portal pair. Returns `(from -> to, to -> from)`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom`, `SelfLink` or `DuplicateLink`.
    pub fn create_portal_pair(&mut self, from: RoomId, to: RoomId) -> GraphResult<(PortalId, PortalId)> {
        let forward = PortalId::generate();
        let reverse = PortalId::generate();
        self.insert_portal_pair(from, to, forward, reverse)?;
        Ok((forward, reverse))
    }

    /// Links two rooms with a portal pair using caller-chosen tokens.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom`, `SelfLink`, `DuplicateLink` or `DuplicatePortal`.
    pub fn insert_portal_pair(
        &mut self,
        from: RoomId,
        to: RoomId,
        forward: PortalId,
        reverse: PortalId,
    ) -> GraphResult<()> {
        self.check_new_link(from, to, forward)?;
        if forward == reverse || self.portal(reverse).is_some() {
            return Err(GraphError::DuplicatePortal(reverse));
        }
        if self.portal_between(to, from).is_some() {
            return Err(GraphError::DuplicateLink { from: to, to: from });
        }

        self.push_portal(PortalRecord {
            id: forward,
            source: from,
            target: to,
            reverse,
        })?;
        self.push_portal(PortalRecord {
            id: reverse,
            source: to,
            target: from,
            reverse: forward,
        })?;

        tracing::debug!("linked {from} -> {to} via {forward} / {reverse}");
        Ok(())
    }

    /// Deletes a portal and its reverse. Returns the reverse token.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPortal` if the portal does not exist.
    pub fn delete_portal(&mut self, id: PortalId) -> GraphResult<PortalId> {
        let record = *self.portal(id).ok_or(GraphError::UnknownPortal(id))?;

        self.remove_portal_record(record);
        if let Some(reverse) = self.portal(record.reverse).copied() {
            self.remove_portal_record(reverse);
        }

        tracing::debug!("unlinked {} -> {}", record.source, record.target);
        Ok(record.reverse)
    }

    /// Points an existing portal at a different room.
    ///
    /// The old reverse portal is deleted and a new reverse is created in the
    /// new target room. Returns the new reverse token.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPortal`, `UnknownRoom`, `SelfLink` or `DuplicateLink`.
    pub fn retarget_portal(&mut self, id: PortalId, new_target: RoomId) -> GraphResult<PortalId> {
        let reverse = PortalId::generate();
        self.retarget_portal_with(id, new_target, reverse)?;
        Ok(reverse)
    }

    /// As [`Self::retarget_portal`] with a caller-chosen token for the new reverse.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPortal`, `UnknownRoom`, `SelfLink`, `DuplicateLink` or
    /// `DuplicatePortal`.
    pub fn retarget_portal_with(
        &mut self,
        id: PortalId,
        new_target: RoomId,
        new_reverse: PortalId,
    ) -> GraphResult<()> {
        let record = *self.portal(id).ok_or(GraphError::UnknownPortal(id))?;
        if record.target == new_target {
            return Ok(());
        }
        if self.room(new_target).is_none() {
            return Err(GraphError::UnknownRoom(new_target));
        }
        if new_target == record.source {
            return Err(GraphError::SelfLink {
                portal: id,
                room: new_target,
            });
        }
        if self.portal_between(record.source, new_target).is_some() {
            return Err(GraphError::DuplicateLink {
                from: record.source,
                to: new_target,
            });
        }
        if self.portal_between(new_target, record.source).is_some() {
            return Err(GraphError::DuplicateLink {
                from: new_target,
                to: record.source,
            });
        }
        if self.portal(new_reverse).is_some() {
            return Err(GraphError::DuplicatePortal(new_reverse));
        }

        if let Some(old_reverse) = self.portal(record.reverse).copied() {
            self.remove_portal_record(old_reverse);
        }

        if let Some(portal) = self.portals.iter_mut().find(|portal| portal.id == id) {
            portal.target = new_target;
            portal.reverse = new_reverse;
        }
        self.push_portal(PortalRecord {
            id: new_reverse,
            source: new_target,
            target: record.source,
            reverse: id,
        })?;

        tracing::debug!("retargeted {id}: {} -> {new_target}", record.target);
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Checks every structural rule of the graph.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> GraphResult<()> {
        let mut room_ids = HashSet::with_capacity(self.rooms.len());
        for room in &self.rooms {
            if !room_ids.insert(room.id) {
                return Err(GraphError::DuplicateRoom(room.id));
            }
        }

        let mut portal_ids = HashSet::with_capacity(self.portals.len());
        for portal in &self.portals {
            if !portal_ids.insert(portal.id) {
                return Err(GraphError::DuplicatePortal(portal.id));
            }
        }

        if let Some(start) = self.start_room {
            if !room_ids.contains(&start) {
                return Err(GraphError::UnknownRoom(start));
            }
        }

        let mut links = HashSet::with_capacity(self.portals.len());
        for portal in &self.portals {
            for room in [portal.source, portal.target] {
                if !room_ids.contains(&room) {
                    return Err(GraphError::UnknownRoom(room));
                }
            }
            if portal.source == portal.target {
                return Err(GraphError::SelfLink {
                    portal: portal.id,
                    room: portal.source,
                });
            }
            if !links.insert((portal.source, portal.target)) {
                return Err(GraphError::DuplicateLink {
                    from: portal.source,
                    to: portal.target,
                });
            }

            let reverse = self.portal(portal.reverse).ok_or(GraphError::MissingReverse {
                portal: portal.id,
                reverse: portal.reverse,
            })?;
            let paired = reverse.reverse == portal.id
                && reverse.source == portal.target
                && reverse.target == portal.source;
            if !paired {
                return Err(GraphError::MismatchedReverse {
                    portal: portal.id,
                    reverse: portal.reverse,
                });
            }
        }

        for room in &self.rooms {
            for &listed in &room.portals {
                let portal = self.portal(listed).ok_or(GraphError::UnknownPortal(listed))?;
                if portal.source != room.id {
                    return Err(GraphError::ForeignPortal {
                        room: room.id,
                        portal: listed,
                    });
                }
            }
        }

        for portal in &self.portals {
            let listed = self
                .room(portal.source)
                .map_or(0, |room| room.portals.iter().filter(|&&p| p == portal.id).count());
            if listed != 1 {
                return Err(GraphError::UnlistedPortal {
                    room: portal.source,
                    portal: portal.id,
                });
            }
        }

        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn room_mut(&mut self, id: RoomId) -> GraphResult<&mut RoomRecord> {
        self.rooms
            .iter_mut()
            .find(|room| room.id == id)
            .ok_or(GraphError::UnknownRoom(id))
    }

    fn check_new_link(&self, from: RoomId, to: RoomId, id: PortalId) -> GraphResult<()> {
        for room in [from, to] {
            if self.room(room).is_none() {
                return Err(GraphError::UnknownRoom(room));
            }
        }
        if from == to {
            return Err(GraphError::SelfLink { portal: id, room: from });
        }
        if self.portal(id).is_some() {
            return Err(GraphError::DuplicatePortal(id));
        }
        if self.portal_between(from, to).is_some() {
            return Err(GraphError::DuplicateLink { from, to });
        }
        Ok(())
    }

    fn push_portal(&mut self, record: PortalRecord) -> GraphResult<()> {
        self.room_mut(record.source)?.portals.push(record.id);
        self.portals.push(record);
        self.pending_events.push(PortalEvent::Added {
            room: record.source,
            portal: record.id,
            reverse: record.reverse,
        });
        Ok(())
    }

    fn remove_portal_record(&mut self, record: PortalRecord) {
        self.pending_events.push(PortalEvent::Removed {
            room: record.source,
            portal: record.id,
            reverse: record.reverse,
        });
        if let Ok(room) = self.room_mut(record.source) {
            room.portals.retain(|&p| p != record.id);
        }
        self.portals.retain(|portal| portal.id != record.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(n: u128) -> RoomId {
        RoomId::from_u128(n)
    }

    fn portal(n: u128) -> PortalId {
        PortalId::from_u128(0x1000 + n)
    }

    fn create_test_graph() -> RoomGraph {
        let mut graph = RoomGraph::new();
        graph.insert_room(room(1), "A").unwrap();
        graph.insert_room(room(2), "B").unwrap();
        graph.insert_room(room(3), "C").unwrap();
        graph.insert_portal_pair(room(1), room(2), portal(1), portal(2)).unwrap();
        graph.insert_portal_pair(room(2), room(3), portal(3), portal(4)).unwrap();
        graph.set_start_room(room(1)).unwrap();
        graph
    }

    #[test]
    fn test_portal_pair_references_each_other() {
        let graph = create_test_graph();
        let forward = graph.portal(portal(1)).unwrap();
        let reverse = graph.portal(forward.reverse).unwrap();

        assert_eq!(reverse.id, portal(2));
        assert_eq!(reverse.reverse, portal(1));
        assert_eq!(reverse.source, room(2));
        assert_eq!(reverse.target, room(1));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_room_portal_list_keeps_creation_order() {
        let graph = create_test_graph();
        let b = graph.room(room(2)).unwrap();
        assert_eq!(b.portals, vec![portal(2), portal(3)]);
    }

    #[test]
    fn test_events_are_raised_for_both_halves() {
        let mut graph = RoomGraph::new();
        let a = graph.add_room("A");
        let b = graph.add_room("B");
        let (ab, ba) = graph.create_portal_pair(a, b).unwrap();

        let events = graph.drain_events();
        assert_eq!(
            events,
            vec![
                PortalEvent::Added { room: a, portal: ab, reverse: ba },
                PortalEvent::Added { room: b, portal: ba, reverse: ab },
            ]
        );
        assert!(graph.drain_events().is_empty());

        graph.delete_portal(ba).unwrap();
        let events = graph.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PortalEvent::Removed { portal, .. } if portal == ba));
        assert_eq!(graph.portal_count(), 0);
    }

    #[test]
    fn test_delete_portal_removes_pair() {
        let mut graph = create_test_graph();
        let reverse = graph.delete_portal(portal(3)).unwrap();

        assert_eq!(reverse, portal(4));
        assert!(graph.portal(portal(3)).is_none());
        assert!(graph.portal(portal(4)).is_none());
        assert!(graph.room(room(3)).unwrap().portals.is_empty());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_duplicate_and_self_links_rejected() {
        let mut graph = create_test_graph();

        let err = graph.create_portal_pair(room(1), room(2)).unwrap_err();
        assert_eq!(err, GraphError::DuplicateLink { from: room(1), to: room(2) });

        let err = graph.create_portal_pair(room(2), room(1)).unwrap_err();
        assert_eq!(err, GraphError::DuplicateLink { from: room(2), to: room(1) });

        let err = graph.create_portal_pair(room(3), room(3)).unwrap_err();
        assert!(matches!(err, GraphError::SelfLink { .. }));

        let err = graph.create_portal_pair(room(1), room(99)).unwrap_err();
        assert_eq!(err, GraphError::UnknownRoom(room(99)));
    }

    #[test]
    fn test_retarget_replaces_reverse() {
        let mut graph = create_test_graph();
        graph.drain_events();

        // B -> C becomes B -> D
        graph.insert_room(room(4), "D").unwrap();
        graph.retarget_portal_with(portal(3), room(4), portal(9)).unwrap();

        assert!(graph.portal(portal(4)).is_none());
        let forward = graph.portal(portal(3)).unwrap();
        assert_eq!(forward.target, room(4));
        assert_eq!(forward.reverse, portal(9));

        let reverse = graph.portal(portal(9)).unwrap();
        assert_eq!(reverse.source, room(4));
        assert_eq!(reverse.target, room(2));
        assert_eq!(graph.room(room(4)).unwrap().portals, vec![portal(9)]);
        assert!(graph.room(room(3)).unwrap().portals.is_empty());

        let events = graph.drain_events();
        assert_eq!(
            events,
            vec![
                PortalEvent::Removed { room: room(3), portal: portal(4), reverse: portal(3) },
                PortalEvent::Added { room: room(4), portal: portal(9), reverse: portal(3) },
            ]
        );
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_remove_room_drops_its_portals() {
        let mut graph = create_test_graph();
        graph.remove_room(room(2)).unwrap();

        assert_eq!(graph.room_count(), 2);
        assert_eq!(graph.portal_count(), 0);
        assert!(graph.room(room(1)).unwrap().portals.is_empty());
        assert!(graph.validate().is_ok());

        graph.remove_room(room(1)).unwrap();
        assert_eq!(graph.start_room(), None);
    }

    #[test]
    fn test_rename_room() {
        let mut graph = create_test_graph();
        graph.rename_room(room(3), "Cellar").unwrap();
        assert_eq!(graph.room_by_name("Cellar").map(|r| r.id), Some(room(3)));
        assert!(graph.rename_room(room(42), "x").is_err());
    }

    #[test]
    fn test_improperly_paired_graph_rejected() {
        // A->B / B->A is fine, but B->C names C->A as its reverse
        let a = room(1);
        let b = room(2);
        let c = room(3);
        let graph = RoomGraph {
            start_room: Some(a),
            rooms: vec![
                RoomRecord { id: a, name: "A".into(), portals: vec![portal(1)] },
                RoomRecord { id: b, name: "B".into(), portals: vec![portal(2), portal(3)] },
                RoomRecord { id: c, name: "C".into(), portals: vec![portal(4)] },
            ],
            portals: vec![
                PortalRecord { id: portal(1), source: a, target: b, reverse: portal(2) },
                PortalRecord { id: portal(2), source: b, target: a, reverse: portal(1) },
                PortalRecord { id: portal(3), source: b, target: c, reverse: portal(4) },
                PortalRecord { id: portal(4), source: c, target: a, reverse: portal(3) },
            ],
            pending_events: Vec::new(),
        };

        let err = graph.validate().unwrap_err();
        assert_eq!(
            err,
            GraphError::MismatchedReverse { portal: portal(3), reverse: portal(4) }
        );
    }

    #[test]
    fn test_missing_reverse_and_unlisted_portal_rejected() {
        let mut graph = create_test_graph();
        graph.portals.retain(|p| p.id != portal(4));
        graph.rooms[2].portals.clear();
        assert_eq!(
            graph.validate().unwrap_err(),
            GraphError::MissingReverse { portal: portal(3), reverse: portal(4) }
        );

        let mut graph = create_test_graph();
        graph.rooms[0].portals.clear();
        assert_eq!(
            graph.validate().unwrap_err(),
            GraphError::UnlistedPortal { room: room(1), portal: portal(1) }
        );
    }

    #[test]
    fn test_toml_round_trip_preserves_order() {
        let graph = create_test_graph();
        let text = graph.to_toml_string().unwrap();
        let loaded = RoomGraph::from_toml_str(&text).unwrap();

        assert_eq!(loaded.start_room(), Some(room(1)));
        assert_eq!(loaded.rooms(), graph.rooms());
        assert_eq!(loaded.portals(), graph.portals());
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = RoomGraph::from_toml_str("rooms = 5").unwrap_err();
        assert!(matches!(err, GraphError::Parse(_)));
    }
}
