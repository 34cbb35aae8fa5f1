//! # Space Error Types

use quantum_graph::GraphError;
use quantum_materials::MaterialError;
use quantum_portals::PortalError;
use quantum_shared::{EntityId, PortalId, RoomId};
use thiserror::Error;

use crate::settings::SettingsError;

/// Errors raised by a compressed space.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpaceError {
    /// Broken room graph.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Material configuration problem.
    #[error(transparent)]
    Material(#[from] MaterialError),

    /// Portal tracker rejected a request.
    #[error(transparent)]
    Portal(#[from] PortalError),

    /// Invalid settings.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Entity does not exist.
    #[error("Entity not found: {0}")]
    UnknownEntity(EntityId),

    /// Room is not part of the graph.
    #[error("Room not found: {0}")]
    UnknownRoom(RoomId),

    /// Portal already has an entity.
    #[error("Portal {0} already has an entity")]
    PortalAlreadySpawned(PortalId),

    /// Portals stay in the room they were created in.
    #[error("Portals cannot be moved to another room: {0}")]
    PortalCannotMove(EntityId),

    /// Parenting would create a cycle.
    #[error("Cannot parent {entity} under its own descendant {parent}")]
    ParentCycle {
        /// Entity being parented.
        entity: EntityId,
        /// Requested parent.
        parent: EntityId,
    },

    /// Room still has entities and cannot be removed.
    #[error("Room {0} still has entities")]
    RoomInUse(RoomId),

    /// Viewpoint position has not been set.
    #[error("Viewpoint position not set")]
    ViewpointUnset,

    /// `start` has not been called.
    #[error("Compressed space not started")]
    NotStarted,
}

/// Result type for space operations.
pub type SpaceResult<T> = Result<T, SpaceError>;
