//! # QUANTUM Portals
//!
//! Crossing detection for entities and the viewpoint.
//!
//! Physics reports which colliders overlap each portal's trigger volume; the
//! tracker turns that, plus a per-tick position sample, into traversal and
//! crossing events. It never touches the scene itself.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut tracker = PortalCrossingTracker::new(TrackerConfig::from_near_clip(0.01, 1.0));
//! tracker.register_portal(placement)?;
//!
//! tracker.collider_entered(placement.id, Collider::solid(collider, entity), &scene)?;
//! for event in tracker.tick(&scene, Some(camera_position)) {
//!     // apply room changes, refresh materials ...
//! }
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod events;
pub mod scene;
pub mod tracker;
pub mod volume;

pub use error::{PortalError, PortalResult};
pub use events::{CrossingEvent, CrossingState};
pub use scene::{Collider, SceneView};
pub use tracker::{ActiveTraversal, PortalCrossingTracker, ViewpointTransition};
pub use volume::{
    PortalPlacement, PortalVolume, TrackedEntity, TrackerConfig, ViewpointWatch, DEFAULT_NEAR_CLIP,
    DEFAULT_TRIGGER_DEPTH,
};
