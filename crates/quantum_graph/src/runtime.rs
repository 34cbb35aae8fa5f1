//! Runtime adjacency.
//!
//! Built once per load from a validated [`RoomGraph`]. Rooms are addressed by
//! dense indices so the layer BFS never hashes a token in its inner loop.

use std::collections::HashMap;

use quantum_shared::{PortalId, RoomId};

use crate::error::{GraphError, GraphResult};
use crate::room_graph::RoomGraph;

/// One room of the runtime graph.
#[derive(Clone, Debug)]
pub struct RuntimeNode {
    /// Room token.
    pub room: RoomId,
    /// Room name, kept for diagnostics.
    pub name: String,
    /// Neighbour indices in portal creation order.
    neighbors: Vec<usize>,
    /// Neighbour index -> portal leading into it.
    portals_out: HashMap<usize, PortalId>,
}

impl RuntimeNode {
    /// Neighbour indices in portal creation order.
    #[must_use]
    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }
}

/// One portal of the runtime graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimePortal {
    /// Portal token.
    pub id: PortalId,
    /// Room the portal sits in.
    pub source: RoomId,
    /// Room the portal looks into.
    pub target: RoomId,
    /// Paired portal going the other way.
    pub reverse: PortalId,
}

/// Index-linked adjacency structure.
#[derive(Clone, Debug, Default)]
pub struct RuntimeGraph {
    nodes: Vec<RuntimeNode>,
    index: HashMap<RoomId, usize>,
    portals: HashMap<PortalId, RuntimePortal>,
    start_room: Option<RoomId>,
}

impl RuntimeGraph {
    /// Validates `graph` and builds the adjacency from it.
    ///
    /// # Errors
    ///
    /// Returns the first validation error of `graph`.
    pub fn build(graph: &RoomGraph) -> GraphResult<Self> {
        graph.validate()?;

        let index: HashMap<RoomId, usize> = graph
            .rooms()
            .iter()
            .enumerate()
            .map(|(i, room)| (room.id, i))
            .collect();

        let portals: HashMap<PortalId, RuntimePortal> = graph
            .portals()
            .iter()
            .map(|p| {
                (
                    p.id,
                    RuntimePortal {
                        id: p.id,
                        source: p.source,
                        target: p.target,
                        reverse: p.reverse,
                    },
                )
            })
            .collect();

        let mut nodes = Vec::with_capacity(graph.room_count());
        for room in graph.rooms() {
            let mut neighbors = Vec::with_capacity(room.portals.len());
            let mut portals_out = HashMap::with_capacity(room.portals.len());
            for portal_id in &room.portals {
                let portal = portals
                    .get(portal_id)
                    .ok_or(GraphError::UnknownPortal(*portal_id))?;
                let target = *index
                    .get(&portal.target)
                    .ok_or(GraphError::UnknownRoom(portal.target))?;
                neighbors.push(target);
                portals_out.insert(target, *portal_id);
            }
            nodes.push(RuntimeNode {
                room: room.id,
                name: room.name.clone(),
                neighbors,
                portals_out,
            });
        }

        tracing::debug!(
            "runtime graph built: {} rooms, {} portals",
            nodes.len(),
            portals.len()
        );

        Ok(Self {
            nodes,
            index,
            portals,
            start_room: graph.start_room(),
        })
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dense index of a room.
    #[must_use]
    pub fn node_index(&self, room: RoomId) -> Option<usize> {
        self.index.get(&room).copied()
    }

    /// Node at a dense index.
    #[must_use]
    pub fn node(&self, index: usize) -> Option<&RuntimeNode> {
        self.nodes.get(index)
    }

    /// All nodes in room creation order.
    #[must_use]
    pub fn nodes(&self) -> &[RuntimeNode] {
        &self.nodes
    }

    /// Portal from node `from` into node `to`.
    #[must_use]
    pub fn portal_between(&self, from: usize, to: usize) -> Option<PortalId> {
        self.nodes
            .get(from)
            .and_then(|node| node.portals_out.get(&to))
            .copied()
    }

    /// Looks up a portal.
    #[must_use]
    pub fn portal(&self, id: PortalId) -> Option<&RuntimePortal> {
        self.portals.get(&id)
    }

    /// All portals, in no particular order.
    pub fn portals(&self) -> impl Iterator<Item = &RuntimePortal> {
        self.portals.values()
    }

    /// Room the viewpoint starts in, if the graph defines one.
    #[must_use]
    pub const fn start_room(&self) -> Option<RoomId> {
        self.start_room
    }
}
