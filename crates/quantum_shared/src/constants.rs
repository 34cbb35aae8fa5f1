//! # Layering Constants
//!
//! Hard limits baked into the stencil layout.
//!
//! **CRITICAL:** the stencil buffer carries one bit per nested layer. Changing
//! these values requires matching shader changes.

// =============================================================================
// LAYER LIMITS
// =============================================================================

/// Number of bits in a room layer mask (one per nested layer).
pub const LAYER_MASK_BITS: u32 = 8;

/// Maximum layer count: the active room plus one layer per mask bit.
pub const MAX_LAYERS: usize = LAYER_MASK_BITS as usize + 1;

// =============================================================================
// PORTAL GEOMETRY
// =============================================================================

/// Depth added to the near clip plane when sizing a portal's crossing box.
pub const PORTAL_DEPTH_PADDING: f32 = 0.2;
