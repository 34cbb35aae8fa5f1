//! # QUANTUM Materials
//!
//! Per-layer material variants for compressed-space rendering.
//!
//! Geometry seen through `k` portals is drawn with a variant of its original
//! material that:
//! - reads the stencil bit of its layer
//! - draws inside the render order sub-range of that layer
//! - clips against the portal the layer is seen through
//!
//! Portals themselves get stencil, surface and view variants; the stencil
//! and view passes write the bit of the layer the portal leads into.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut registry = MaterialVariantRegistry::new(settings.render_queues.clone(), 9)?;
//!
//! registry.begin_pass();
//! // ... layer pass notifies rooms, members request variants ...
//! let variant = registry.get_or_create(&brick, VariantRequest::on_layer(2), &clips)?;
//! let report = registry.end_pass();
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod queues;
pub mod registry;
pub mod variant;

pub use error::{MaterialError, MaterialResult};
pub use queues::{LayerQueues, RenderQueueRange, RenderQueueTable};
pub use registry::{
    ClipSource, MaterialVariantRegistry, RegistryStats, SweepReport, Traversal, VariantRequest,
};
pub use variant::{BaseMaterial, ClipMode, MaterialKind, MaterialVariant, TraversalClip, VariantUniforms};
