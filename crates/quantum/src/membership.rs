//! Room membership subscriptions.
//!
//! Each entity holds one [`MembershipHandle`] for the room it belongs to and
//! gives it back when it changes rooms or is destroyed. A layer pass walks the
//! members of each room in subscription order.

use std::collections::HashMap;

use quantum_shared::{EntityId, RoomId};

/// Subscription of one entity to one room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MembershipHandle {
    room: RoomId,
    slot: u64,
}

impl MembershipHandle {
    /// Room the handle subscribes to.
    #[inline]
    #[must_use]
    pub const fn room(&self) -> RoomId {
        self.room
    }
}

/// Members of every room.
#[derive(Debug, Default)]
pub struct RoomMembership {
    rooms: HashMap<RoomId, Vec<(u64, EntityId)>>,
    next_slot: u64,
}

impl RoomMembership {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `entity` to `room`.
    pub fn subscribe(&mut self, room: RoomId, entity: EntityId) -> MembershipHandle {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.rooms.entry(room).or_default().push((slot, entity));
        MembershipHandle { room, slot }
    }

    /// Gives a subscription back. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, handle: MembershipHandle) -> bool {
        let Some(members) = self.rooms.get_mut(&handle.room) else {
            return false;
        };
        let before = members.len();
        members.retain(|(slot, _)| *slot != handle.slot);
        let removed = members.len() != before;
        if members.is_empty() {
            self.rooms.remove(&handle.room);
        }
        removed
    }

    /// Members of `room` in subscription order.
    #[must_use]
    pub fn members(&self, room: RoomId) -> Vec<EntityId> {
        self.rooms
            .get(&room)
            .map(|members| members.iter().map(|(_, entity)| *entity).collect())
            .unwrap_or_default()
    }

    /// Number of members of `room`.
    #[must_use]
    pub fn member_count(&self, room: RoomId) -> usize {
        self.rooms.get(&room).map_or(0, Vec::len)
    }

    /// Rooms that currently have members.
    pub fn occupied_rooms(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.rooms.keys().copied()
    }
}
