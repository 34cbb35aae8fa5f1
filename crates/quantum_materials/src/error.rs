//! # Material Error Types

use thiserror::Error;

/// Errors that can occur while configuring or creating material variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterialError {
    /// Requested layer index is outside the layer budget.
    #[error("layer {layer} out of range (max layers {max_layers})")]
    LayerOutOfRange {
        /// Requested layer.
        layer: usize,
        /// Configured layer budget.
        max_layers: usize,
    },

    /// No portal leads into the requested nested layer, so there is no clip
    /// transform to attach.
    #[error("no portal leads into layer {layer}")]
    MissingClipPortal {
        /// Requested layer.
        layer: usize,
    },

    /// Render order table does not match the layer budget or is malformed.
    #[error("invalid render queue table: {0}")]
    InvalidQueueTable(String),
}

/// Result type for material operations.
pub type MaterialResult<T> = Result<T, MaterialError>;
