//! # Portal Crossing Tracker
//!
//! Follows every movable entity near a portal and decides when it starts
//! traversing, backs out, or crosses into the target room.
//!
//! ## States (per entity, per portal)
//!
//! - **NotTracked**: no collider of the entity is inside the trigger volume.
//! - **InReach**: tracked, still in front of the plane (local z >= 0).
//! - **Traversing**: behind the plane (local z < 0), blended into the target room.
//!
//! A crossing is a tick where the previous local z was negative, the current
//! one is not, and the pivot is inside the precise crossing box. The entity
//! then hands off to the reverse portal and continues traversing there.
//!
//! ## Determinism
//!
//! Portals are evaluated in registration order. Handoffs to reverse portals
//! are staged and applied only after every portal was evaluated, so a tick
//! never observes half-applied state.

use std::collections::HashMap;

use quantum_shared::{EntityId, PortalId, RoomId, Vec3};
use tracing::{debug, info, warn};

use crate::error::{PortalError, PortalResult};
use crate::events::{CrossingEvent, CrossingState};
use crate::scene::{Collider, SceneView};
use crate::volume::{PortalPlacement, PortalVolume, TrackedEntity, TrackerConfig, ViewpointWatch};

/// An entity currently traversing a portal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveTraversal {
    /// Portal being traversed.
    pub portal: PortalId,
    /// Room the portal leads into.
    pub target_room: RoomId,
}

/// Running viewpoint overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewpointTransition {
    /// Portal the viewpoint is passing.
    pub portal: PortalId,
    /// Room shown by the overlay.
    pub target_room: RoomId,
    /// Overlay is paused.
    pub paused: bool,
}

/// Parent chain snapshot of a traversing entity.
#[derive(Clone, Debug)]
struct TraverserWatch {
    entity: EntityId,
    ancestors: Vec<EntityId>,
}

/// Entity-level traversal state. One portal at a time per entity.
#[derive(Debug, Default)]
struct TraversalTable {
    active: HashMap<EntityId, ActiveTraversal>,
    watches: Vec<TraverserWatch>,
}

impl TraversalTable {
    fn begin<S: SceneView + ?Sized>(
        &mut self,
        entity: EntityId,
        portal: PortalId,
        target_room: RoomId,
        scene: &S,
    ) -> bool {
        if self.active.contains_key(&entity) {
            return false;
        }
        self.active.insert(entity, ActiveTraversal { portal, target_room });
        self.watches.retain(|w| w.entity != entity);
        self.watches.push(TraverserWatch {
            entity,
            ancestors: scene.ancestors(entity),
        });
        true
    }

    /// Ends the traversal only if it is on `portal`.
    fn end(&mut self, entity: EntityId, portal: PortalId) -> bool {
        match self.active.get(&entity) {
            Some(t) if t.portal == portal => {
                self.remove(entity);
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, entity: EntityId) -> Option<ActiveTraversal> {
        self.watches.retain(|w| w.entity != entity);
        self.active.remove(&entity)
    }

    fn portal_of(&self, entity: EntityId) -> Option<PortalId> {
        self.active.get(&entity).map(|t| t.portal)
    }
}

/// Staged move of a crossed entity onto the reverse portal.
#[derive(Clone, Copy, Debug)]
struct Handoff {
    entity: EntityId,
    reverse: PortalId,
    world: Vec3,
}

/// The crossing state machine for all registered portals.
pub struct PortalCrossingTracker {
    /// Tuning.
    config: TrackerConfig,
    /// Registered portals, in registration order.
    volumes: Vec<PortalVolume>,
    /// Portal id to position in `volumes`.
    index: HashMap<PortalId, usize>,
    /// Entity-level traversal state.
    table: TraversalTable,
    /// Portal whose overlay is running.
    viewpoint_portal: Option<PortalId>,
    /// Traversal feature switch.
    enabled: bool,
    /// Ticks processed.
    ticks: u64,
}

impl Default for PortalCrossingTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl PortalCrossingTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            volumes: Vec::new(),
            index: HashMap::new(),
            table: TraversalTable::default(),
            viewpoint_portal: None,
            enabled: true,
            ticks: 0,
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a portal.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal is already registered or its surface has
    /// no area.
    pub fn register_portal(&mut self, placement: PortalPlacement) -> PortalResult<()> {
        if self.index.contains_key(&placement.id) {
            return Err(PortalError::DuplicatePortal(placement.id));
        }
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if !valid(placement.width) || !valid(placement.height) {
            return Err(PortalError::InvalidDimensions {
                portal: placement.id,
                width: placement.width,
                height: placement.height,
            });
        }

        debug!(portal = %placement.id, target = %placement.target_room, "Portal registered");
        self.index.insert(placement.id, self.volumes.len());
        self.volumes.push(PortalVolume::new(placement, &self.config));
        Ok(())
    }

    /// Unregisters a portal, dropping everything it tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal is not registered.
    pub fn unregister_portal(&mut self, portal: PortalId) -> PortalResult<Vec<CrossingEvent>> {
        let position = *self.index.get(&portal).ok_or(PortalError::UnknownPortal(portal))?;
        let volume = self.volumes.remove(position);
        self.rebuild_index();

        let mut events = Vec::new();
        for record in &volume.tracked {
            if self.table.end(record.entity, portal) {
                events.push(CrossingEvent::Aborted {
                    entity: record.entity,
                    portal: Some(portal),
                });
            } else {
                events.push(CrossingEvent::Released {
                    entity: record.entity,
                    portal,
                });
            }
        }
        let orphaned: Vec<EntityId> = self
            .table
            .active
            .iter()
            .filter(|(_, t)| t.portal == portal)
            .map(|(e, _)| *e)
            .collect();
        for entity in orphaned {
            self.table.remove(entity);
            events.push(CrossingEvent::Aborted {
                entity,
                portal: Some(portal),
            });
        }
        if self.viewpoint_portal == Some(portal) {
            self.viewpoint_portal = None;
            events.push(CrossingEvent::ViewpointTransitionEnded { portal });
        }

        debug!(portal = %portal, "Portal unregistered");
        Ok(events)
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .volumes
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id(), i))
            .collect();
    }

    fn position_of(&self, portal: PortalId) -> PortalResult<usize> {
        self.index.get(&portal).copied().ok_or(PortalError::UnknownPortal(portal))
    }

    // =========================================================================
    // Trigger notifications
    // =========================================================================

    /// A collider entered a portal's trigger volume.
    ///
    /// Trigger colliders, portals and static entities are ignored. The owner is
    /// tracked unless an ancestor already is; tracked descendants of the owner
    /// are replaced by it.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal is not registered.
    pub fn collider_entered<S: SceneView + ?Sized>(
        &mut self,
        portal: PortalId,
        collider: Collider,
        scene: &S,
    ) -> PortalResult<Vec<CrossingEvent>> {
        let position = self.position_of(portal)?;
        let mut events = Vec::new();
        if !self.enabled || collider.is_trigger {
            return Ok(events);
        }
        if scene.is_portal(collider.owner) || scene.is_static(collider.owner) {
            return Ok(events);
        }

        let volume = &mut self.volumes[position];
        if !volume.contained.iter().any(|c| c.id == collider.id) {
            volume.contained.push(collider);
        }
        track_entity(volume, &mut self.table, collider.owner, None, scene, &mut events);
        Ok(events)
    }

    /// A collider left a portal's trigger volume.
    ///
    /// A tracked entity is released once none of its colliders remain inside.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal is not registered.
    pub fn collider_exited<S: SceneView + ?Sized>(
        &mut self,
        portal: PortalId,
        collider: Collider,
        scene: &S,
    ) -> PortalResult<Vec<CrossingEvent>> {
        let position = self.position_of(portal)?;
        let mut events = Vec::new();
        if collider.is_trigger {
            return Ok(events);
        }

        let volume = &mut self.volumes[position];
        volume.remove_collider(collider.id);

        let owner = collider.owner;
        let root = if volume.is_tracking(owner) {
            Some(owner)
        } else {
            volume
                .tracked
                .iter()
                .map(|t| t.entity)
                .find(|&t| scene.is_descendant_of(owner, t))
        };

        if let Some(root) = root {
            let still_inside = volume.contained.iter().any(|c| scene.is_descendant_of(c.owner, root));
            if !still_inside {
                release_entity(volume, &mut self.table, root, &mut events);
            }
        }
        Ok(events)
    }

    /// The viewpoint entered a portal's trigger volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal is not registered.
    pub fn viewpoint_entered(&mut self, portal: PortalId, position: Vec3) -> PortalResult<()> {
        let index = self.position_of(portal)?;
        let volume = &mut self.volumes[index];
        if volume.viewpoint.is_none() {
            let local = volume.to_local(position);
            volume.viewpoint = Some(ViewpointWatch::new(local));
        }
        Ok(())
    }

    /// The viewpoint left a portal's trigger volume; its overlay stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal is not registered.
    pub fn viewpoint_exited(&mut self, portal: PortalId) -> PortalResult<Vec<CrossingEvent>> {
        let index = self.position_of(portal)?;
        self.volumes[index].viewpoint = None;

        let mut events = Vec::new();
        if self.viewpoint_portal == Some(portal) {
            self.viewpoint_portal = None;
            info!(portal = %portal, "Viewpoint transition ended");
            events.push(CrossingEvent::ViewpointTransitionEnded { portal });
        }
        Ok(events)
    }

    /// Re-evaluates an entity after its parent changed.
    ///
    /// A tracked entity that now sits below another tracked entity is
    /// released; a detached entity whose colliders are still inside a trigger
    /// volume is tracked on its own.
    pub fn entity_reparented<S: SceneView + ?Sized>(&mut self, entity: EntityId, scene: &S) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        if !self.enabled {
            return events;
        }
        for volume in &mut self.volumes {
            reconcile(volume, &mut self.table, entity, scene, &mut events);
        }
        events
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Evaluates every tracked entity and the viewpoint.
    ///
    /// Order: entity records of every portal, staged handoffs, parent chain
    /// polls of traversing entities, then the viewpoint.
    pub fn tick<S: SceneView + ?Sized>(&mut self, scene: &S, viewpoint: Option<Vec3>) -> Vec<CrossingEvent> {
        self.ticks += 1;
        let mut events = Vec::new();
        if !self.enabled {
            return events;
        }

        let mut handoffs = Vec::new();
        for volume in &mut self.volumes {
            update_entities(volume, &mut self.table, scene, &mut handoffs, &mut events);
        }
        self.apply_handoffs(&handoffs, scene, &mut events);
        self.poll_parents(scene, &mut events);

        if let Some(position) = viewpoint {
            self.update_viewpoint(position, &mut events);
        }
        events
    }

    fn apply_handoffs<S: SceneView + ?Sized>(&mut self, handoffs: &[Handoff], scene: &S, events: &mut Vec<CrossingEvent>) {
        for handoff in handoffs {
            let Some(&position) = self.index.get(&handoff.reverse) else {
                warn!(entity = %handoff.entity, reverse = %handoff.reverse, "Reverse portal not registered, handoff skipped");
                continue;
            };
            let volume = &mut self.volumes[position];
            let local = volume.to_local(handoff.world);
            track_entity(volume, &mut self.table, handoff.entity, Some(local), scene, events);

            let reverse = volume.id();
            let target_room = volume.target_room();
            if self.table.begin(handoff.entity, reverse, target_room, scene) {
                info!(entity = %handoff.entity, portal = %reverse, "Traversal started after crossing");
                events.push(CrossingEvent::TraversalStarted {
                    entity: handoff.entity,
                    portal: reverse,
                    target_room,
                });
            }
        }
    }

    fn poll_parents<S: SceneView + ?Sized>(&mut self, scene: &S, events: &mut Vec<CrossingEvent>) {
        let mut changed = Vec::new();
        for watch in &mut self.table.watches {
            let current = scene.ancestors(watch.entity);
            if current != watch.ancestors {
                watch.ancestors = current;
                changed.push(watch.entity);
            }
        }

        for entity in changed {
            let Some(portal) = self.table.portal_of(entity) else {
                continue;
            };
            let Some(&position) = self.index.get(&portal) else {
                continue;
            };
            debug!(entity = %entity, portal = %portal, "Traversing entity re-parented");
            reconcile(&mut self.volumes[position], &mut self.table, entity, scene, events);
        }
    }

    fn update_viewpoint(&mut self, position: Vec3, events: &mut Vec<CrossingEvent>) {
        let mut handoff = None;

        for volume in &mut self.volumes {
            let portal = volume.id();
            let target_room = volume.target_room();
            let local = volume.to_local(position);
            let inside = volume.crossing_box.contains(position);
            let Some(watch) = volume.viewpoint.as_mut() else {
                continue;
            };

            if self.viewpoint_portal != Some(portal) {
                watch.tracking = false;
            }

            if !watch.tracking {
                if local.z < 0.0 {
                    watch.tracking = true;
                    watch.paused = false;
                    self.viewpoint_portal = Some(portal);
                    info!(portal = %portal, target = %target_room, "Viewpoint transition started");
                    events.push(CrossingEvent::ViewpointTransitionStarted { portal, target_room });
                }
            } else if watch.previous_local.z < 0.0 && local.z >= 0.0 && inside {
                info!(portal = %portal, room = %target_room, "Viewpoint crossed portal");
                events.push(CrossingEvent::ActiveRoomChange {
                    portal,
                    room: target_room,
                });
                events.push(CrossingEvent::ViewpointTransitionEnded { portal });
                volume.viewpoint = None;
                self.viewpoint_portal = None;
                handoff = Some(volume.placement.reverse);
                continue;
            } else if (local.z >= 0.0 || !inside) && !watch.paused {
                watch.paused = true;
                debug!(portal = %portal, "Viewpoint transition paused");
                events.push(CrossingEvent::ViewpointTransitionPaused { portal });
            } else if local.z < 0.0 && watch.paused && inside {
                watch.paused = false;
                debug!(portal = %portal, "Viewpoint transition resumed");
                events.push(CrossingEvent::ViewpointTransitionResumed { portal });
            }
            watch.previous_local = local;
        }

        if let Some(reverse) = handoff {
            if let Some(&index) = self.index.get(&reverse) {
                let volume = &mut self.volumes[index];
                let local = volume.to_local(position);
                volume.viewpoint = Some(ViewpointWatch::new(local));
            }
        }
    }

    // =========================================================================
    // Aborts
    // =========================================================================

    /// Drops all tracking of `entity` and its subtree (teleport, destroy).
    pub fn abort<S: SceneView + ?Sized>(&mut self, entity: EntityId, scene: &S) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        let mut dropped = Vec::new();

        for volume in &mut self.volumes {
            volume.contained.retain(|c| !scene.is_descendant_of(c.owner, entity));
            volume.tracked.retain(|t| {
                let inside = scene.is_descendant_of(t.entity, entity);
                if inside {
                    dropped.push(t.entity);
                }
                !inside
            });
        }
        if !dropped.contains(&entity) && self.table.active.contains_key(&entity) {
            dropped.push(entity);
        }

        for dropped_entity in dropped {
            let portal = self.table.remove(dropped_entity).map(|t| t.portal);
            info!(entity = %dropped_entity, "Portal tracking aborted");
            events.push(CrossingEvent::Aborted {
                entity: dropped_entity,
                portal,
            });
        }
        events
    }

    /// Drops every tracked entity and the viewpoint overlay.
    pub fn abort_all(&mut self) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        for volume in &mut self.volumes {
            for record in volume.tracked.drain(..) {
                let portal = self.table.remove(record.entity).map(|t| t.portal);
                events.push(CrossingEvent::Aborted {
                    entity: record.entity,
                    portal,
                });
            }
            volume.contained.clear();
            volume.viewpoint = None;
        }
        for (entity, traversal) in self.table.active.drain() {
            events.push(CrossingEvent::Aborted {
                entity,
                portal: Some(traversal.portal),
            });
        }
        self.table.watches.clear();
        if let Some(portal) = self.viewpoint_portal.take() {
            events.push(CrossingEvent::ViewpointTransitionEnded { portal });
        }
        if !events.is_empty() {
            info!(count = events.len(), "All portal tracking aborted");
        }
        events
    }

    /// Turns traversal on or off. Turning it off aborts everything.
    pub fn set_enabled(&mut self, enabled: bool) -> Vec<CrossingEvent> {
        if self.enabled == enabled {
            return Vec::new();
        }
        self.enabled = enabled;
        info!(enabled, "Portal traversal toggled");
        if enabled {
            Vec::new()
        } else {
            self.abort_all()
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Tracker tuning.
    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Whether traversal is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ticks processed so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Number of registered portals.
    #[must_use]
    pub fn portal_count(&self) -> usize {
        self.volumes.len()
    }

    /// Registered portal volume.
    #[must_use]
    pub fn volume(&self, portal: PortalId) -> Option<&PortalVolume> {
        self.index.get(&portal).map(|&i| &self.volumes[i])
    }

    /// All volumes in registration order.
    #[must_use]
    pub fn volumes(&self) -> &[PortalVolume] {
        &self.volumes
    }

    /// Crossing state of `entity` with respect to `portal`.
    #[must_use]
    pub fn state_of(&self, entity: EntityId, portal: PortalId) -> CrossingState {
        match self.volume(portal) {
            Some(volume) if volume.is_tracking(entity) => {
                if self.table.portal_of(entity) == Some(portal) {
                    CrossingState::Traversing
                } else {
                    CrossingState::InReach
                }
            }
            _ => CrossingState::NotTracked,
        }
    }

    /// Traversal of `entity` itself (not inherited from ancestors).
    #[must_use]
    pub fn traversal(&self, entity: EntityId) -> Option<ActiveTraversal> {
        self.table.active.get(&entity).copied()
    }

    /// Number of traversing entities.
    #[must_use]
    pub fn traverser_count(&self) -> usize {
        self.table.active.len()
    }

    /// Running viewpoint overlay.
    #[must_use]
    pub fn viewpoint_transition(&self) -> Option<ViewpointTransition> {
        let portal = self.viewpoint_portal?;
        let volume = self.volume(portal)?;
        Some(ViewpointTransition {
            portal,
            target_room: volume.target_room(),
            paused: volume.viewpoint.is_some_and(|w| w.paused),
        })
    }
}

// =============================================================================
// Per-volume helpers
// =============================================================================

/// Adds `entity` to the tracked set unless an ancestor (or itself) is already
/// tracked. Tracked descendants are released in its favour.
fn track_entity<S: SceneView + ?Sized>(
    volume: &mut PortalVolume,
    table: &mut TraversalTable,
    entity: EntityId,
    previous_local: Option<Vec3>,
    scene: &S,
    events: &mut Vec<CrossingEvent>,
) -> bool {
    if volume.tracked.iter().any(|t| scene.is_descendant_of(entity, t.entity)) {
        return false;
    }

    let superseded: Vec<EntityId> = volume
        .tracked
        .iter()
        .map(|t| t.entity)
        .filter(|&t| scene.is_descendant_of(t, entity))
        .collect();
    for child in superseded {
        release_entity(volume, table, child, events);
    }

    volume.tracked.push(TrackedEntity { entity, previous_local });
    debug!(entity = %entity, portal = %volume.id(), "Entity in reach");
    events.push(CrossingEvent::EnteredReach {
        entity,
        portal: volume.id(),
    });
    true
}

fn release_entity(volume: &mut PortalVolume, table: &mut TraversalTable, entity: EntityId, events: &mut Vec<CrossingEvent>) {
    let portal = volume.id();
    if !volume.remove_record(entity) {
        return;
    }
    if table.end(entity, portal) {
        info!(entity = %entity, portal = %portal, "Traversal ended on release");
        events.push(CrossingEvent::TraversalEnded { entity, portal });
    }
    debug!(entity = %entity, portal = %portal, "Entity released");
    events.push(CrossingEvent::Released { entity, portal });
}

fn reconcile<S: SceneView + ?Sized>(
    volume: &mut PortalVolume,
    table: &mut TraversalTable,
    entity: EntityId,
    scene: &S,
    events: &mut Vec<CrossingEvent>,
) {
    let covered = volume
        .tracked
        .iter()
        .any(|t| t.entity != entity && scene.is_descendant_of(entity, t.entity));

    if volume.is_tracking(entity) {
        if covered {
            release_entity(volume, table, entity, events);
        }
        return;
    }

    let has_colliders = volume.contained.iter().any(|c| scene.is_descendant_of(c.owner, entity));
    if !covered && has_colliders {
        let local = scene.position(entity).map(|p| volume.to_local(p));
        track_entity(volume, table, entity, local, scene, events);
    }
}

fn update_entities<S: SceneView + ?Sized>(
    volume: &mut PortalVolume,
    table: &mut TraversalTable,
    scene: &S,
    handoffs: &mut Vec<Handoff>,
    events: &mut Vec<CrossingEvent>,
) {
    let portal = volume.id();
    let placement = volume.placement;
    let mut k = 0;

    while k < volume.tracked.len() {
        let record = volume.tracked[k];
        let Some(world) = scene.position(record.entity) else {
            k += 1;
            continue;
        };
        let local = placement.frame.to_local(world);

        let crossed = record.previous_local.is_some_and(|p| p.z < 0.0)
            && local.z >= 0.0
            && volume.crossing_box.contains(world);
        if crossed {
            volume.tracked.remove(k);
            table.end(record.entity, portal);
            info!(entity = %record.entity, portal = %portal, to = %placement.target_room, "Entity crossed portal");
            events.push(CrossingEvent::Crossed {
                entity: record.entity,
                portal,
                reverse: placement.reverse,
                from_room: placement.source_room,
                to_room: placement.target_room,
            });
            handoffs.push(Handoff {
                entity: record.entity,
                reverse: placement.reverse,
                world,
            });
            continue;
        }

        if local.z >= 0.0 {
            if table.end(record.entity, portal) {
                info!(entity = %record.entity, portal = %portal, "Traversal ended");
                events.push(CrossingEvent::TraversalEnded {
                    entity: record.entity,
                    portal,
                });
            }
        } else if table.begin(record.entity, portal, placement.target_room, scene) {
            info!(entity = %record.entity, portal = %portal, "Traversal started");
            events.push(CrossingEvent::TraversalStarted {
                entity: record.entity,
                portal,
                target_room: placement.target_room,
            });
        }

        volume.tracked[k].previous_local = Some(local);
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantum_shared::{ColliderId, PortalFrame, Quat};
    use std::collections::HashSet;

    #[derive(Default)]
    struct TestScene {
        positions: HashMap<EntityId, Vec3>,
        parents: HashMap<EntityId, EntityId>,
        statics: Vec<EntityId>,
    }

    impl TestScene {
        fn spawn(&mut self, index: u32, position: Vec3) -> EntityId {
            let id = EntityId::new(index, 0);
            self.positions.insert(id, position);
            id
        }

        fn place(&mut self, entity: EntityId, position: Vec3) {
            self.positions.insert(entity, position);
        }
    }

    impl SceneView for TestScene {
        fn position(&self, entity: EntityId) -> Option<Vec3> {
            self.positions.get(&entity).copied()
        }

        fn parent(&self, entity: EntityId) -> Option<EntityId> {
            self.parents.get(&entity).copied()
        }

        fn is_static(&self, entity: EntityId) -> bool {
            self.statics.contains(&entity)
        }

        fn is_portal(&self, _entity: EntityId) -> bool {
            false
        }
    }

    const FORWARD: PortalId = PortalId::from_u128(1);
    const REVERSE: PortalId = PortalId::from_u128(2);
    const ROOM_A: RoomId = RoomId::from_u128(10);
    const ROOM_B: RoomId = RoomId::from_u128(11);

    fn placement(id: PortalId) -> PortalPlacement {
        let frame = PortalFrame::new(Vec3::ZERO, Quat::IDENTITY);
        let (reverse, source_room, target_room, frame) = if id == FORWARD {
            (REVERSE, ROOM_A, ROOM_B, frame)
        } else {
            (FORWARD, ROOM_B, ROOM_A, frame.reversed())
        };
        PortalPlacement {
            id,
            reverse,
            source_room,
            target_room,
            frame,
            width: 2.0,
            height: 3.0,
        }
    }

    fn create_tracker_in_order(order: [PortalId; 2]) -> PortalCrossingTracker {
        let mut tracker = PortalCrossingTracker::default();
        for portal in order {
            tracker.register_portal(placement(portal)).unwrap();
        }
        tracker
    }

    fn create_test_tracker() -> PortalCrossingTracker {
        create_tracker_in_order([FORWARD, REVERSE])
    }

    fn at(z: f32) -> Vec3 {
        Vec3::new(0.0, 0.0, z)
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_sizes() {
        let mut tracker = create_test_tracker();
        let placement = *tracker.volume(FORWARD).unwrap().placement();
        assert_eq!(tracker.register_portal(placement), Err(PortalError::DuplicatePortal(FORWARD)));

        let flat = PortalPlacement {
            id: PortalId::from_u128(3),
            width: 0.0,
            ..placement
        };
        assert!(matches!(tracker.register_portal(flat), Err(PortalError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_enter_tracks_in_reach() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(0.5));

        let events = tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        assert_eq!(events, vec![CrossingEvent::EnteredReach { entity: e, portal: FORWARD }]);
        assert_eq!(tracker.state_of(e, FORWARD), CrossingState::InReach);
        assert_eq!(tracker.state_of(e, REVERSE), CrossingState::NotTracked);
    }

    #[test]
    fn test_trigger_and_static_colliders_ignored() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(0.5));
        let wall = scene.spawn(2, at(0.5));
        scene.statics.push(wall);

        tracker.collider_entered(FORWARD, Collider::trigger(ColliderId::new(1), e), &scene).unwrap();
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(2), wall), &scene).unwrap();
        assert!(tracker.volume(FORWARD).unwrap().tracked().is_empty());
    }

    #[test]
    fn test_behind_plane_starts_traversal() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(0.5));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();

        assert!(tracker.tick(&scene, None).is_empty());

        scene.place(e, at(-0.05));
        let events = tracker.tick(&scene, None);
        assert_eq!(
            events,
            vec![CrossingEvent::TraversalStarted { entity: e, portal: FORWARD, target_room: ROOM_B }]
        );
        assert_eq!(tracker.state_of(e, FORWARD), CrossingState::Traversing);

        // Back in front, but beyond the crossing box: a retreat, not a crossing.
        scene.place(e, at(0.5));
        let events = tracker.tick(&scene, None);
        assert_eq!(events, vec![CrossingEvent::TraversalEnded { entity: e, portal: FORWARD }]);
    }

    #[test]
    fn test_backing_out_outside_box_is_not_a_crossing() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(-0.05));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        tracker.tick(&scene, None);
        assert_eq!(tracker.state_of(e, FORWARD), CrossingState::Traversing);

        // Far in front of the plane, outside the thin crossing box.
        scene.place(e, at(2.0));
        let events = tracker.tick(&scene, None);
        assert_eq!(events, vec![CrossingEvent::TraversalEnded { entity: e, portal: FORWARD }]);
        assert_eq!(tracker.state_of(e, FORWARD), CrossingState::InReach);
    }

    #[test]
    fn test_first_tick_never_crosses() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(0.05));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();

        let events = tracker.tick(&scene, None);
        assert!(events.is_empty());
    }

    #[test]
    fn test_crossing_hands_off_to_reverse() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(-0.05));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        tracker.tick(&scene, None);

        scene.place(e, at(0.05));
        let events = tracker.tick(&scene, None);
        assert_eq!(
            events,
            vec![
                CrossingEvent::Crossed {
                    entity: e,
                    portal: FORWARD,
                    reverse: REVERSE,
                    from_room: ROOM_A,
                    to_room: ROOM_B,
                },
                CrossingEvent::EnteredReach { entity: e, portal: REVERSE },
                CrossingEvent::TraversalStarted { entity: e, portal: REVERSE, target_room: ROOM_A },
            ]
        );
        assert_eq!(tracker.state_of(e, FORWARD), CrossingState::NotTracked);
        assert_eq!(tracker.state_of(e, REVERSE), CrossingState::Traversing);
        assert_eq!(tracker.traversal(e).map(|t| t.target_room), Some(ROOM_A));
    }

    /// Runs one entity across FORWARD while another starts traversing REVERSE
    /// in the same tick. Returns both ticks' events and the tracked sets.
    fn run_simultaneous_crossings(
        order: [PortalId; 2],
    ) -> (Vec<Vec<CrossingEvent>>, HashSet<EntityId>, HashSet<EntityId>) {
        let mut tracker = create_tracker_in_order(order);
        let mut scene = TestScene::default();
        let crosser = scene.spawn(1, at(-0.05));
        // In front of REVERSE: its frame is flipped, so world z < 0 is local z > 0.
        let waiting = scene.spawn(2, Vec3::new(0.5, 0.0, -0.5));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), crosser), &scene).unwrap();
        tracker.collider_entered(REVERSE, Collider::solid(ColliderId::new(2), waiting), &scene).unwrap();

        let mut ticks = vec![tracker.tick(&scene, None)];
        scene.place(crosser, at(0.05));
        scene.place(waiting, Vec3::new(0.5, 0.0, 0.05));
        ticks.push(tracker.tick(&scene, None));

        let tracked = |portal| -> HashSet<EntityId> {
            tracker.volume(portal).unwrap().tracked().iter().map(|t| t.entity).collect()
        };
        (ticks, tracked(FORWARD), tracked(REVERSE))
    }

    fn events_of(events: &[CrossingEvent], entity: EntityId) -> Vec<CrossingEvent> {
        events.iter().copied().filter(|e| e.entity() == Some(entity)).collect()
    }

    #[test]
    fn test_portal_registration_order_does_not_change_outcome() {
        let (ticks_ab, forward_ab, reverse_ab) = run_simultaneous_crossings([FORWARD, REVERSE]);
        let (ticks_ba, forward_ba, reverse_ba) = run_simultaneous_crossings([REVERSE, FORWARD]);

        let crosser = EntityId::new(1, 0);
        let waiting = EntityId::new(2, 0);
        for (ab, ba) in ticks_ab.iter().zip(&ticks_ba) {
            assert_eq!(ab.len(), ba.len());
            assert_eq!(events_of(ab, crosser), events_of(ba, crosser));
            assert_eq!(events_of(ab, waiting), events_of(ba, waiting));
        }

        // The handed-off entity is not evaluated by the reverse portal in the
        // tick it crossed, whichever portal runs first.
        assert_eq!(
            events_of(&ticks_ab[1], crosser),
            vec![
                CrossingEvent::Crossed {
                    entity: crosser,
                    portal: FORWARD,
                    reverse: REVERSE,
                    from_room: ROOM_A,
                    to_room: ROOM_B,
                },
                CrossingEvent::EnteredReach { entity: crosser, portal: REVERSE },
                CrossingEvent::TraversalStarted { entity: crosser, portal: REVERSE, target_room: ROOM_A },
            ]
        );
        assert_eq!(
            events_of(&ticks_ab[1], waiting),
            vec![CrossingEvent::TraversalStarted { entity: waiting, portal: REVERSE, target_room: ROOM_A }]
        );

        assert!(forward_ab.is_empty());
        assert_eq!(forward_ab, forward_ba);
        assert_eq!(reverse_ab, HashSet::from([crosser, waiting]));
        assert_eq!(reverse_ab, reverse_ba);
    }

    #[test]
    fn test_walking_away_after_crossing_ends_traversal() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(-0.05));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        tracker.tick(&scene, None);
        scene.place(e, at(0.05));
        tracker.tick(&scene, None);

        // Reverse frame is flipped: world z = 2 is local z = -2, still behind it.
        scene.place(e, at(2.0));
        let events = tracker.tick(&scene, None);
        assert!(events.is_empty());

        let events = tracker.collider_exited(REVERSE, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        assert_eq!(
            events,
            vec![
                CrossingEvent::TraversalEnded { entity: e, portal: REVERSE },
                CrossingEvent::Released { entity: e, portal: REVERSE },
            ]
        );
        assert_eq!(tracker.traverser_count(), 0);
    }

    #[test]
    fn test_child_collider_does_not_duplicate_parent() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let parent = scene.spawn(1, at(0.5));
        let child = scene.spawn(2, at(0.5));
        scene.parents.insert(child, parent);

        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), parent), &scene).unwrap();
        let events = tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(2), child), &scene).unwrap();
        assert!(events.is_empty());
        assert_eq!(tracker.volume(FORWARD).unwrap().tracked().len(), 1);

        // Parent collider leaves but the child's is still inside: keep tracking.
        let events = tracker.collider_exited(FORWARD, Collider::solid(ColliderId::new(1), parent), &scene).unwrap();
        assert!(events.is_empty());
        assert_eq!(tracker.state_of(parent, FORWARD), CrossingState::InReach);

        let events = tracker.collider_exited(FORWARD, Collider::solid(ColliderId::new(2), child), &scene).unwrap();
        assert_eq!(events, vec![CrossingEvent::Released { entity: parent, portal: FORWARD }]);
    }

    #[test]
    fn test_parent_supersedes_tracked_child() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let parent = scene.spawn(1, at(0.5));
        let child = scene.spawn(2, at(0.5));
        scene.parents.insert(child, parent);

        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(2), child), &scene).unwrap();
        let events = tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), parent), &scene).unwrap();
        assert_eq!(
            events,
            vec![
                CrossingEvent::Released { entity: child, portal: FORWARD },
                CrossingEvent::EnteredReach { entity: parent, portal: FORWARD },
            ]
        );
        assert_eq!(tracker.state_of(child, FORWARD), CrossingState::NotTracked);
    }

    #[test]
    fn test_detached_child_is_tracked_on_its_own() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let parent = scene.spawn(1, at(-0.5));
        let child = scene.spawn(2, at(-0.5));
        scene.parents.insert(child, parent);

        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(2), child), &scene).unwrap();
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), parent), &scene).unwrap();
        tracker.tick(&scene, None);
        assert_eq!(tracker.state_of(parent, FORWARD), CrossingState::Traversing);

        scene.parents.remove(&child);
        let events = tracker.entity_reparented(child, &scene);
        assert_eq!(events, vec![CrossingEvent::EnteredReach { entity: child, portal: FORWARD }]);

        tracker.tick(&scene, None);
        assert_eq!(tracker.state_of(child, FORWARD), CrossingState::Traversing);
    }

    #[test]
    fn test_reparent_under_tracked_entity_releases_traverser() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let carrier = scene.spawn(1, at(0.5));
        let crate_entity = scene.spawn(2, at(-0.2));

        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), carrier), &scene).unwrap();
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(2), crate_entity), &scene).unwrap();
        tracker.tick(&scene, None);
        assert_eq!(tracker.state_of(crate_entity, FORWARD), CrossingState::Traversing);

        // Picked up outside of the service API; the tick poll notices it.
        scene.parents.insert(crate_entity, carrier);
        let events = tracker.tick(&scene, None);
        assert!(events.contains(&CrossingEvent::TraversalEnded { entity: crate_entity, portal: FORWARD }));
        assert!(events.contains(&CrossingEvent::Released { entity: crate_entity, portal: FORWARD }));
        assert_eq!(tracker.state_of(carrier, FORWARD), CrossingState::InReach);
    }

    #[test]
    fn test_abort_clears_subtree() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(-0.5));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        tracker.tick(&scene, None);

        let events = tracker.abort(e, &scene);
        assert_eq!(events, vec![CrossingEvent::Aborted { entity: e, portal: Some(FORWARD) }]);
        assert_eq!(tracker.traverser_count(), 0);
        assert!(tracker.volume(FORWARD).unwrap().contained().is_empty());
    }

    #[test]
    fn test_disable_aborts_and_ignores_triggers() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(-0.5));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        tracker.tick(&scene, None);

        let events = tracker.set_enabled(false);
        assert_eq!(events, vec![CrossingEvent::Aborted { entity: e, portal: Some(FORWARD) }]);

        let events = tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        assert!(events.is_empty());
        assert!(tracker.tick(&scene, None).is_empty());
        assert!(tracker.set_enabled(true).is_empty());
    }

    #[test]
    fn test_unregister_aborts_traversers() {
        let mut tracker = create_test_tracker();
        let mut scene = TestScene::default();
        let e = scene.spawn(1, at(-0.5));
        tracker.collider_entered(FORWARD, Collider::solid(ColliderId::new(1), e), &scene).unwrap();
        tracker.tick(&scene, None);

        let events = tracker.unregister_portal(FORWARD).unwrap();
        assert_eq!(events, vec![CrossingEvent::Aborted { entity: e, portal: Some(FORWARD) }]);
        assert_eq!(tracker.portal_count(), 1);
        assert!(tracker.volume(REVERSE).is_some());
        assert_eq!(tracker.unregister_portal(FORWARD), Err(PortalError::UnknownPortal(FORWARD)));
    }

    #[test]
    fn test_viewpoint_transition_lifecycle() {
        let mut tracker = create_test_tracker();
        let scene = TestScene::default();

        tracker.viewpoint_entered(FORWARD, at(0.5)).unwrap();
        assert!(tracker.tick(&scene, Some(at(0.5))).is_empty());

        let events = tracker.tick(&scene, Some(at(-0.05)));
        assert_eq!(
            events,
            vec![CrossingEvent::ViewpointTransitionStarted { portal: FORWARD, target_room: ROOM_B }]
        );
        let overlay = tracker.viewpoint_transition().unwrap();
        assert_eq!(overlay.target_room, ROOM_B);
        assert!(!overlay.paused);

        // Leaves the crossing box sideways: paused.
        let events = tracker.tick(&scene, Some(Vec3::new(5.0, 0.0, -0.05)));
        assert_eq!(events, vec![CrossingEvent::ViewpointTransitionPaused { portal: FORWARD }]);
        assert!(tracker.viewpoint_transition().unwrap().paused);

        let events = tracker.tick(&scene, Some(at(-0.05)));
        assert_eq!(events, vec![CrossingEvent::ViewpointTransitionResumed { portal: FORWARD }]);

        let events = tracker.tick(&scene, Some(at(0.05)));
        assert_eq!(
            events,
            vec![
                CrossingEvent::ActiveRoomChange { portal: FORWARD, room: ROOM_B },
                CrossingEvent::ViewpointTransitionEnded { portal: FORWARD },
            ]
        );
        assert!(tracker.viewpoint_transition().is_none());

        // The viewpoint is now behind the reverse portal.
        let events = tracker.tick(&scene, Some(at(0.05)));
        assert_eq!(
            events,
            vec![CrossingEvent::ViewpointTransitionStarted { portal: REVERSE, target_room: ROOM_A }]
        );
    }

    #[test]
    fn test_viewpoint_exit_stops_overlay() {
        let mut tracker = create_test_tracker();
        let scene = TestScene::default();
        tracker.viewpoint_entered(FORWARD, at(-0.3)).unwrap();
        tracker.tick(&scene, Some(at(-0.3)));
        assert!(tracker.viewpoint_transition().is_some());

        let events = tracker.viewpoint_exited(FORWARD).unwrap();
        assert_eq!(events, vec![CrossingEvent::ViewpointTransitionEnded { portal: FORWARD }]);
        assert!(tracker.viewpoint_transition().is_none());
    }
}
