//! # Graph Error Types
//!
//! Every error here is a configuration error: a graph that produces one is
//! rejected at load time.

use quantum_shared::{PortalId, RoomId};
use thiserror::Error;

/// Errors raised while editing, loading or traversing a room graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A room token does not exist in the graph.
    #[error("unknown room {0}")]
    UnknownRoom(RoomId),

    /// A portal token does not exist in the graph.
    #[error("unknown portal {0}")]
    UnknownPortal(PortalId),

    /// Two rooms share one token.
    #[error("duplicate room {0}")]
    DuplicateRoom(RoomId),

    /// Two portals share one token.
    #[error("duplicate portal {0}")]
    DuplicatePortal(PortalId),

    /// A portal's reverse token points at nothing.
    #[error("portal {portal} names reverse {reverse}, which does not exist")]
    MissingReverse {
        /// The portal being checked.
        portal: PortalId,
        /// The reverse token it stores.
        reverse: PortalId,
    },

    /// A portal and its reverse do not describe the same link backwards.
    #[error("portal {portal} and its reverse {reverse} are not paired")]
    MismatchedReverse {
        /// The portal being checked.
        portal: PortalId,
        /// The reverse token it stores.
        reverse: PortalId,
    },

    /// A portal leads back into its own room.
    #[error("portal {portal} links room {room} to itself")]
    SelfLink {
        /// Offending portal.
        portal: PortalId,
        /// Room on both ends.
        room: RoomId,
    },

    /// Two portals connect the same ordered pair of rooms.
    #[error("rooms {from} and {to} are already linked")]
    DuplicateLink {
        /// Source room.
        from: RoomId,
        /// Target room.
        to: RoomId,
    },

    /// A room lists a portal that starts somewhere else.
    #[error("room {room} lists portal {portal}, which starts elsewhere")]
    ForeignPortal {
        /// Listing room.
        room: RoomId,
        /// Listed portal.
        portal: PortalId,
    },

    /// A portal is missing from its source room's ordered list.
    #[error("portal {portal} is not listed by its source room {room}")]
    UnlistedPortal {
        /// Source room.
        room: RoomId,
        /// Portal missing from the list.
        portal: PortalId,
    },

    /// The layer budget is outside the supported range.
    #[error("max layers must be between 1 and {max}, got {requested}")]
    InvalidMaxLayers {
        /// Requested layer count.
        requested: usize,
        /// Largest supported layer count.
        max: usize,
    },

    /// A query needed an active room before any was set.
    #[error("no active room has been assigned")]
    ActiveRoomUnset,

    /// Graph text could not be parsed.
    #[error("failed to parse room graph: {0}")]
    Parse(String),

    /// Graph could not be written out.
    #[error("failed to serialize room graph: {0}")]
    Serialize(String),

    /// Graph file could not be read.
    #[error("failed to read room graph: {0}")]
    Io(String),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
