//! # QUANTUM
//!
//! Compressed space: several rooms overlap the same world volume and are
//! joined by portal pairs. Only the viewpoint's room renders unmasked; rooms
//! seen through portals are drawn on nested stencil layers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CompressedSpace                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌───────────────┐   masks   ┌────────────────┐                  │
//! │  │ quantum_graph │──────────>│ quantum_       │                  │
//! │  │               │           │ materials      │                  │
//! │  │ • RoomGraph   │           │                │                  │
//! │  │ • BFS layers  │           │ • per-layer    │                  │
//! │  └───────▲───────┘           │   variants     │                  │
//! │          │ active room       │ • sweep        │                  │
//! │  ┌───────┴────────┐          └───────▲────────┘                  │
//! │  │ quantum_portals│  traversal       │                           │
//! │  │                │──────────────────┘                           │
//! │  │ • crossings    │                                              │
//! │  └────────────────┘                                              │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `space`: the service
//! - `scene`: entities and their materials
//! - `settings`: startup configuration
//! - `events`: outward notifications

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod events;
pub mod membership;
pub mod overlay;
pub mod scene;
pub mod settings;
pub mod space;

// Re-export the layers
pub use quantum_graph as graph;
pub use quantum_materials as materials;
pub use quantum_portals as portals;
pub use quantum_shared as shared;

// Re-export commonly used types
pub use error::{SpaceError, SpaceResult};
pub use events::{EventBus, EventReceiver, SpaceEvent};
pub use membership::{MembershipHandle, RoomMembership};
pub use overlay::TransitionOverlay;
pub use scene::{EntityDesc, EntityKind, EntityRecord, PortalDesc, PortalMaterials, Scene};
pub use settings::{LogLevel, QuantumSettings, SettingsError, SettingsResult};
pub use space::{CompressedSpace, PortalBinding};
