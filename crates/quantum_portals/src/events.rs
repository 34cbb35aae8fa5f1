//! Outcomes of trigger notifications and ticks.

use quantum_shared::{EntityId, PortalId, RoomId};

/// Per-(entity, portal) crossing state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CrossingState {
    /// The portal does not track the entity.
    #[default]
    NotTracked,
    /// Tracked, but still in front of the plane.
    InReach,
    /// Behind the plane; the entity is rendered as partially in the target room.
    Traversing,
}

/// Something the space service has to react to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CrossingEvent {
    // =========================================================================
    // Entity tracking
    // =========================================================================
    /// A portal started tracking an entity.
    EnteredReach {
        /// Tracked root entity.
        entity: EntityId,
        /// Portal tracking it.
        portal: PortalId,
    },

    /// A portal stopped tracking an entity because its last collider left.
    Released {
        /// Entity no longer tracked.
        entity: EntityId,
        /// Portal that released it.
        portal: PortalId,
    },

    // =========================================================================
    // Traversal
    // =========================================================================
    /// The entity moved behind the plane and now blends into the target room.
    TraversalStarted {
        /// Traversing entity.
        entity: EntityId,
        /// Portal being traversed.
        portal: PortalId,
        /// Room the portal leads into.
        target_room: RoomId,
    },

    /// The entity backed out in front of the plane again.
    TraversalEnded {
        /// Entity that stopped traversing.
        entity: EntityId,
        /// Portal it was traversing.
        portal: PortalId,
    },

    /// The entity went all the way through. It now belongs to `to_room` and
    /// traverses `reverse`.
    Crossed {
        /// Entity that crossed.
        entity: EntityId,
        /// Portal crossed.
        portal: PortalId,
        /// Paired portal that took over tracking.
        reverse: PortalId,
        /// Room left behind.
        from_room: RoomId,
        /// Room entered.
        to_room: RoomId,
    },

    /// Tracking was torn down from outside (teleport, destroy, disable).
    Aborted {
        /// Entity whose tracking was dropped.
        entity: EntityId,
        /// Portal it was traversing, if any.
        portal: Option<PortalId>,
    },

    // =========================================================================
    // Viewpoint
    // =========================================================================
    /// The viewpoint moved behind a portal; the target room overlay starts.
    ViewpointTransitionStarted {
        /// Portal the viewpoint is passing.
        portal: PortalId,
        /// Room the overlay shows.
        target_room: RoomId,
    },

    /// The viewpoint left the crossing box or backed out; the overlay pauses.
    ViewpointTransitionPaused {
        /// Portal of the paused overlay.
        portal: PortalId,
    },

    /// The viewpoint is behind the plane and inside the box again.
    ViewpointTransitionResumed {
        /// Portal of the resumed overlay.
        portal: PortalId,
    },

    /// The overlay is turned off.
    ViewpointTransitionEnded {
        /// Portal of the finished overlay.
        portal: PortalId,
    },

    /// The viewpoint crossed the plane; the active room must change.
    ActiveRoomChange {
        /// Portal crossed.
        portal: PortalId,
        /// New active room.
        room: RoomId,
    },
}

impl CrossingEvent {
    /// Entity the event concerns, if any.
    #[must_use]
    pub const fn entity(&self) -> Option<EntityId> {
        match *self {
            Self::EnteredReach { entity, .. }
            | Self::Released { entity, .. }
            | Self::TraversalStarted { entity, .. }
            | Self::TraversalEnded { entity, .. }
            | Self::Crossed { entity, .. }
            | Self::Aborted { entity, .. } => Some(entity),
            _ => None,
        }
    }
}
