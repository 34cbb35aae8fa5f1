//! # QUANTUM Shared
//!
//! Common types used by every crate of the compressed-space stack.
//!
//! ## Contents
//!
//! - [`ids`] - stable room/portal tokens, entity and base material ids
//! - [`layer_mask`] - the 8-bit nested layer field
//! - [`geometry`] - portal frames and oriented bounding boxes
//! - [`constants`] - hard limits of the layering scheme
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on a rendering backend. Everything here is a
//! plain value type that can be copied across crate boundaries.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod constants;
pub mod geometry;
pub mod ids;
pub mod layer_mask;

pub use constants::{LAYER_MASK_BITS, MAX_LAYERS, PORTAL_DEPTH_PADDING};
pub use geometry::{Obb, PortalFrame};
pub use ids::{BaseMaterialId, ColliderId, EntityId, PortalId, RoomId};
pub use layer_mask::LayerMask;

pub use glam::{Mat4, Quat, Vec3};
