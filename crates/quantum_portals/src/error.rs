//! Error types for the crossing tracker.

use quantum_shared::PortalId;
use thiserror::Error;

/// Errors raised when registering or addressing portals.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortalError {
    /// Portal is not registered with the tracker.
    #[error("Portal not registered: {0}")]
    UnknownPortal(PortalId),

    /// Portal is already registered.
    #[error("Portal already registered: {0}")]
    DuplicatePortal(PortalId),

    /// Portal surface has no area.
    #[error("Portal {portal} has invalid size {width}x{height}")]
    InvalidDimensions {
        /// Portal with the bad size.
        portal: PortalId,
        /// Requested width.
        width: f32,
        /// Requested height.
        height: f32,
    },
}

/// Result type for tracker operations.
pub type PortalResult<T> = Result<T, PortalError>;
