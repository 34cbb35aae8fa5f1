//! # Layer Assignment
//!
//! Breadth-first walk from the active room that hands out one nested layer
//! per dequeued room.
//!
//! ## Algorithm
//!
//! 1. Clear every room mask and the per-layer routing tables.
//! 2. Seed the queue with `(active, none)`. The first pop gets bit value 0, so
//!    the active room never gains a bit.
//! 3. Each pop ORs the current bit into the room's mask, records the portal it
//!    was reached through (and the reverse, which must not render on that
//!    layer), enqueues every neighbour except the one it came from, then
//!    advances the bit `0 -> 1 -> 2 -> 4 -> ...`.
//! 4. Stop when `max_layers` pops happened, the bit left the 8-bit field, or
//!    the queue ran dry.
//! 5. Rooms with an empty mask that are not active are hidden; everything
//!    else is told its mask.
//!
//! Rooms reached along several paths collect several bits. The active room
//! counts against `max_layers`.

use std::collections::VecDeque;

use quantum_shared::{LayerMask, PortalId, RoomId, MAX_LAYERS};

use crate::error::{GraphError, GraphResult};
use crate::runtime::RuntimeGraph;

/// Receives the outcome of a layer pass, one call per room.
pub trait LayerObserver {
    /// The room has no layer and is not active.
    fn room_hidden(&mut self, room: RoomId);

    /// The room is visible with `mask`, and is the active room if `is_active`.
    fn layer_mask_applied(&mut self, room: RoomId, mask: LayerMask, is_active: bool);
}

/// Observer that ignores every notification.
impl LayerObserver for () {
    fn room_hidden(&mut self, _room: RoomId) {}

    fn layer_mask_applied(&mut self, _room: RoomId, _mask: LayerMask, _is_active: bool) {}
}

/// Counters describing one finished pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerPassSummary {
    /// Room the pass started from.
    pub active_room: RoomId,
    /// Pops performed (layers handed out, active room included).
    pub steps: usize,
    /// Rooms that ended up visible.
    pub visible_rooms: usize,
    /// Rooms that ended up hidden.
    pub hidden_rooms: usize,
}

/// BFS layer assignment over a [`RuntimeGraph`].
#[derive(Debug)]
pub struct LayerAssignmentEngine {
    graph: RuntimeGraph,
    max_layers: usize,
    masks: Vec<LayerMask>,
    visited: Vec<bool>,
    visible: Vec<usize>,
    active: Option<usize>,
    per_layer_portal: Vec<Option<PortalId>>,
    per_layer_disabled_portal: Vec<Option<PortalId>>,
    queue: VecDeque<(usize, Option<usize>)>,
    pass_count: u64,
}

impl LayerAssignmentEngine {
    /// Creates an engine owning `graph`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMaxLayers` unless `1 <= max_layers <= MAX_LAYERS`.
    pub fn new(graph: RuntimeGraph, max_layers: usize) -> GraphResult<Self> {
        if max_layers == 0 || max_layers > MAX_LAYERS {
            return Err(GraphError::InvalidMaxLayers {
                requested: max_layers,
                max: MAX_LAYERS,
            });
        }

        let rooms = graph.len();
        Ok(Self {
            graph,
            max_layers,
            masks: vec![LayerMask::EMPTY; rooms],
            visited: vec![false; rooms],
            visible: Vec::with_capacity(rooms),
            active: None,
            per_layer_portal: vec![None; max_layers],
            per_layer_disabled_portal: vec![None; max_layers],
            queue: VecDeque::with_capacity(rooms * 2),
            pass_count: 0,
        })
    }

    /// Recomputes every room's mask from `active_room` and notifies `observer`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` if `active_room` is not in the graph. Nothing is
    /// modified in that case.
    pub fn recompute(
        &mut self,
        active_room: RoomId,
        observer: &mut impl LayerObserver,
    ) -> GraphResult<LayerPassSummary> {
        let active = self
            .graph
            .node_index(active_room)
            .ok_or(GraphError::UnknownRoom(active_room))?;

        self.masks.fill(LayerMask::EMPTY);
        self.visited.fill(false);
        self.visible.clear();
        self.per_layer_portal.fill(None);
        self.per_layer_disabled_portal.fill(None);
        self.queue.clear();

        self.active = Some(active);
        self.queue.push_back((active, None));

        let mut bit: u8 = 0;
        let mut steps = 0;
        while let Some((room, came_from)) = self.queue.pop_front() {
            if !self.visited[room] {
                self.visited[room] = true;
                self.visible.push(room);
            }
            self.masks[room] |= LayerMask::from_bits(bit);

            if let Some(previous) = came_from {
                self.per_layer_portal[steps] = self.graph.portal_between(previous, room);
                self.per_layer_disabled_portal[steps] = self.graph.portal_between(room, previous);
            }

            if let Some(node) = self.graph.node(room) {
                for &neighbor in node.neighbors() {
                    if Some(neighbor) != came_from {
                        self.queue.push_back((neighbor, Some(room)));
                    }
                }
            }

            bit = if bit == 0 { 1 } else { bit << 1 };
            steps += 1;

            if steps >= self.max_layers || bit == 0 {
                break;
            }
        }
        self.queue.clear();

        let mut hidden = 0;
        for (index, node) in self.graph.nodes().iter().enumerate() {
            let mask = self.masks[index];
            let is_active = index == active;
            if mask.is_empty() && !is_active {
                hidden += 1;
                observer.room_hidden(node.room);
            } else {
                observer.layer_mask_applied(node.room, mask, is_active);
            }
        }

        self.pass_count += 1;
        let summary = LayerPassSummary {
            active_room,
            steps,
            visible_rooms: self.graph.len() - hidden,
            hidden_rooms: hidden,
        };
        tracing::debug!(
            "layer pass {} from {active_room}: {steps} steps, {} visible, {hidden} hidden",
            self.pass_count,
            summary.visible_rooms
        );
        Ok(summary)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The runtime graph this engine walks.
    #[must_use]
    pub const fn graph(&self) -> &RuntimeGraph {
        &self.graph
    }

    /// Layer budget, active room included.
    #[must_use]
    pub const fn max_layers(&self) -> usize {
        self.max_layers
    }

    /// Number of completed passes.
    #[must_use]
    pub const fn pass_count(&self) -> u64 {
        self.pass_count
    }

    /// Active room of the last pass.
    #[must_use]
    pub fn active_room(&self) -> Option<RoomId> {
        self.active
            .and_then(|index| self.graph.node(index))
            .map(|node| node.room)
    }

    /// Active room of the last pass.
    ///
    /// # Errors
    ///
    /// Returns `ActiveRoomUnset` before the first pass.
    pub fn require_active_room(&self) -> GraphResult<RoomId> {
        self.active_room().ok_or(GraphError::ActiveRoomUnset)
    }

    /// Mask of `room` from the last pass. `None` for unknown rooms.
    #[must_use]
    pub fn layer_mask(&self, room: RoomId) -> Option<LayerMask> {
        self.graph.node_index(room).map(|index| self.masks[index])
    }

    /// True when `room` is the active room.
    #[must_use]
    pub fn is_active_room(&self, room: RoomId) -> bool {
        self.active.is_some() && self.graph.node_index(room) == self.active
    }

    /// True when `room` is active or holds at least one layer.
    #[must_use]
    pub fn is_visible(&self, room: RoomId) -> bool {
        self.is_active_room(room) || self.layer_mask(room).is_some_and(|mask| !mask.is_empty())
    }

    /// Visible rooms in discovery order, active room first.
    pub fn visible_rooms(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.visible
            .iter()
            .filter_map(|&index| self.graph.node(index))
            .map(|node| node.room)
    }

    /// Every room with its current mask, in room creation order.
    pub fn masks(&self) -> impl Iterator<Item = (RoomId, LayerMask)> + '_ {
        self.graph
            .nodes()
            .iter()
            .zip(self.masks.iter())
            .map(|(node, &mask)| (node.room, mask))
    }

    /// Portal through which nested layer `layer` is seen. Always `None` for
    /// layer 0.
    #[must_use]
    pub fn portal_leading_to_layer(&self, layer: usize) -> Option<PortalId> {
        if layer == 0 {
            return None;
        }
        self.per_layer_portal.get(layer).copied().flatten()
    }

    /// Portal that must not render on nested layer `layer`.
    #[must_use]
    pub fn disabled_portal_on_layer(&self, layer: usize) -> Option<PortalId> {
        self.per_layer_disabled_portal.get(layer).copied().flatten()
    }

    /// True when `portal` is the reverse of the portal `layer` is seen through.
    #[must_use]
    pub fn is_portal_disabled_on_layer(&self, portal: PortalId, layer: usize) -> bool {
        self.disabled_portal_on_layer(layer) == Some(portal)
    }

    /// First layer at or after `from_layer` that `portal` leads into.
    #[must_use]
    pub fn portal_target_layer(&self, portal: PortalId, from_layer: usize) -> Option<usize> {
        (from_layer..self.per_layer_portal.len()).find(|&layer| self.per_layer_portal[layer] == Some(portal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room_graph::RoomGraph;

    fn room(n: u128) -> RoomId {
        RoomId::from_u128(n)
    }

    fn portal(n: u128) -> PortalId {
        PortalId::from_u128(0x1000 + n)
    }

    /// Rooms 1..=count in a line; pair i links room i to room i+1 with
    /// portals 2i-1 (forward) and 2i (back).
    fn create_chain(count: u128) -> RoomGraph {
        let mut graph = RoomGraph::new();
        for i in 1..=count {
            graph.insert_room(room(i), format!("R{i}")).unwrap();
        }
        for i in 1..count {
            graph
                .insert_portal_pair(room(i), room(i + 1), portal(2 * i - 1), portal(2 * i))
                .unwrap();
        }
        graph.set_start_room(room(1)).unwrap();
        graph
    }

    fn create_engine(graph: &RoomGraph, max_layers: usize) -> LayerAssignmentEngine {
        LayerAssignmentEngine::new(RuntimeGraph::build(graph).unwrap(), max_layers).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        hidden: Vec<RoomId>,
        applied: Vec<(RoomId, LayerMask, bool)>,
    }

    impl LayerObserver for Recorder {
        fn room_hidden(&mut self, room: RoomId) {
            self.hidden.push(room);
        }

        fn layer_mask_applied(&mut self, room: RoomId, mask: LayerMask, is_active: bool) {
            self.applied.push((room, mask, is_active));
        }
    }

    #[test]
    fn test_three_room_chain() {
        let graph = create_chain(3);
        let mut engine = create_engine(&graph, 9);
        engine.recompute(room(1), &mut ()).unwrap();

        assert_eq!(engine.layer_mask(room(1)), Some(LayerMask::EMPTY));
        assert!(engine.is_active_room(room(1)));
        assert_eq!(engine.layer_mask(room(2)), Some(LayerMask::from_bits(0b01)));
        assert_eq!(engine.layer_mask(room(3)), Some(LayerMask::from_bits(0b10)));

        assert_eq!(engine.portal_leading_to_layer(0), None);
        assert_eq!(engine.portal_leading_to_layer(1), Some(portal(1)));
        assert_eq!(engine.disabled_portal_on_layer(1), Some(portal(2)));
        assert_eq!(engine.portal_leading_to_layer(2), Some(portal(3)));
        assert!(engine.is_portal_disabled_on_layer(portal(4), 2));
        assert!(!engine.is_portal_disabled_on_layer(portal(4), 1));
    }

    #[test]
    fn test_exactly_one_active_room() {
        let graph = create_chain(5);
        let mut engine = create_engine(&graph, 9);
        let mut recorder = Recorder::default();
        engine.recompute(room(3), &mut recorder).unwrap();

        let active: Vec<_> = recorder.applied.iter().filter(|(_, _, a)| *a).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, room(3));
        assert!(active[0].1.is_empty());
        assert_eq!(engine.active_room(), Some(room(3)));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let graph = create_chain(6);
        let mut engine = create_engine(&graph, 9);

        engine.recompute(room(2), &mut ()).unwrap();
        let first: Vec<_> = engine.masks().collect();
        let first_portals: Vec<_> = (0..9).map(|l| engine.portal_leading_to_layer(l)).collect();

        engine.recompute(room(2), &mut ()).unwrap();
        let second: Vec<_> = engine.masks().collect();
        let second_portals: Vec<_> = (0..9).map(|l| engine.portal_leading_to_layer(l)).collect();

        assert_eq!(first, second);
        assert_eq!(first_portals, second_portals);
    }

    #[test]
    fn test_stale_bits_cleared_on_recompute() {
        let graph = create_chain(3);
        let mut engine = create_engine(&graph, 9);

        engine.recompute(room(1), &mut ()).unwrap();
        engine.recompute(room(3), &mut ()).unwrap();

        assert_eq!(engine.layer_mask(room(3)), Some(LayerMask::EMPTY));
        assert_eq!(engine.layer_mask(room(2)), Some(LayerMask::from_bits(0b01)));
        assert_eq!(engine.layer_mask(room(1)), Some(LayerMask::from_bits(0b10)));
        assert!(!engine.is_active_room(room(1)));
    }

    #[test]
    fn test_unreachable_rooms_hidden() {
        let graph = create_chain(12);
        let mut engine = create_engine(&graph, 9);
        let mut recorder = Recorder::default();
        let summary = engine.recompute(room(1), &mut recorder).unwrap();

        // active + 8 nested layers
        assert_eq!(summary.steps, 9);
        assert_eq!(engine.layer_mask(room(9)), Some(LayerMask::from_bits(0b1000_0000)));
        assert_eq!(recorder.hidden, vec![room(10), room(11), room(12)]);
        assert!(!engine.is_visible(room(10)));
        assert_eq!(summary.hidden_rooms, 3);
        assert_eq!(summary.visible_rooms, 9);
    }

    #[test]
    fn test_max_layers_limits_depth() {
        let graph = create_chain(5);
        let mut engine = create_engine(&graph, 3);
        engine.recompute(room(1), &mut ()).unwrap();

        assert!(engine.is_visible(room(3)));
        assert!(!engine.is_visible(room(4)));

        let mut engine = create_engine(&graph, 1);
        engine.recompute(room(1), &mut ()).unwrap();
        assert_eq!(engine.visible_rooms().collect::<Vec<_>>(), vec![room(1)]);
    }

    #[test]
    fn test_isolated_active_room() {
        let mut graph = RoomGraph::new();
        graph.insert_room(room(1), "Alone").unwrap();
        graph.insert_room(room(2), "Other").unwrap();
        let mut engine = create_engine(&graph, 9);
        let summary = engine.recompute(room(1), &mut ()).unwrap();

        assert_eq!(summary.steps, 1);
        assert!(engine.is_visible(room(1)));
        assert!(!engine.is_visible(room(2)));
    }

    #[test]
    fn test_cycle_gives_room_multiple_bits() {
        // triangle 1-2-3
        let mut graph = create_chain(3);
        graph
            .insert_portal_pair(room(3), room(1), portal(10), portal(11))
            .unwrap();
        let mut engine = create_engine(&graph, 4);
        engine.recompute(room(1), &mut ()).unwrap();

        // room 1 lists [1->2, 1->3]; pops: 1, 2 (from 1), 3 (from 1), 3 (from 2)
        assert_eq!(engine.layer_mask(room(2)), Some(LayerMask::from_bits(0b001)));
        assert_eq!(engine.layer_mask(room(3)), Some(LayerMask::from_bits(0b110)));
        assert_eq!(engine.portal_target_layer(portal(11), 0), Some(2));
        assert_eq!(engine.portal_target_layer(portal(3), 0), Some(3));
        assert_eq!(engine.portal_target_layer(portal(3), 4), None);
    }

    #[test]
    fn test_unknown_active_room_leaves_state_untouched() {
        let graph = create_chain(3);
        let mut engine = create_engine(&graph, 9);
        engine.recompute(room(1), &mut ()).unwrap();

        let err = engine.recompute(room(77), &mut ()).unwrap_err();
        assert_eq!(err, GraphError::UnknownRoom(room(77)));
        assert_eq!(engine.active_room(), Some(room(1)));
        assert_eq!(engine.layer_mask(room(3)), Some(LayerMask::from_bits(0b10)));
        assert_eq!(engine.pass_count(), 1);
    }

    #[test]
    fn test_invalid_max_layers() {
        let graph = RuntimeGraph::build(&create_chain(2)).unwrap();
        assert!(LayerAssignmentEngine::new(graph.clone(), 0).is_err());
        assert!(LayerAssignmentEngine::new(graph, 10).is_err());
    }

    #[test]
    fn test_active_room_unset_before_first_pass() {
        let engine = create_engine(&create_chain(2), 9);
        assert_eq!(engine.require_active_room(), Err(GraphError::ActiveRoomUnset));
        assert!(!engine.is_active_room(room(1)));
    }
}
