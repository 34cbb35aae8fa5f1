//! # QUANTUM Graph
//!
//! Rooms, portals and the breadth-first layer assignment that decides which
//! rooms are visible from the active one and how deep each one sits.
//!
//! ## Design Principles
//!
//! 1. **Paired portals** - every portal has a reverse; edits keep pairs intact
//! 2. **Fail at load** - malformed graphs are rejected before any pass runs
//! 3. **Full recompute** - every pass rebuilds every mask from scratch
//! 4. **Deterministic order** - neighbours are visited in portal creation order
//!
//! ## Example
//!
//! ```rust,ignore
//! use quantum_graph::{LayerAssignmentEngine, RoomGraph, RuntimeGraph};
//!
//! let graph = RoomGraph::from_toml_file("levels/manor.toml")?;
//! let runtime = RuntimeGraph::build(&graph)?;
//! let mut engine = LayerAssignmentEngine::new(runtime, 9)?;
//!
//! engine.recompute(graph.start_room().unwrap(), &mut observer)?;
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod layering;
pub mod room_graph;
pub mod runtime;

pub use error::{GraphError, GraphResult};
pub use layering::{LayerAssignmentEngine, LayerObserver, LayerPassSummary};
pub use room_graph::{PortalEvent, PortalRecord, RoomGraph, RoomRecord};
pub use runtime::{RuntimeGraph, RuntimeNode, RuntimePortal};
