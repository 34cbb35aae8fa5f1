//! # Compressed Space
//!
//! One service per loaded level. Owns the room graph, the layering engine,
//! the material variant registry, the crossing tracker and the scene, and
//! keeps them consistent.
//!
//! ## Flow
//!
//! ```text
//! viewpoint crosses ──> ActiveRoomChange ──> layer pass (BFS)
//!                                               │
//!              begin_pass ── refresh every member of every room ── end_pass
//!
//! entity crosses ──> room switch (cascade) ──> refresh that subtree only
//! ```
//!
//! Only viewpoint crossings re-run the layer pass. Entity crossings update one
//! subtree's room and materials.

use std::collections::HashMap;
use std::sync::Arc;

use quantum_graph::{
    GraphError, GraphResult, LayerAssignmentEngine, LayerObserver, LayerPassSummary, PortalEvent,
    RoomGraph, RuntimeGraph,
};
use quantum_materials::{
    BaseMaterial, ClipSource, MaterialResult, MaterialVariant, MaterialVariantRegistry, Traversal,
    VariantRequest,
};
use quantum_portals::{
    ActiveTraversal, Collider, CrossingEvent, PortalCrossingTracker, PortalPlacement, SceneView,
};
use quantum_shared::{EntityId, LayerMask, Mat4, PortalId, RoomId, Vec3};
use tracing::{debug, info, warn};

use crate::error::{SpaceError, SpaceResult};
use crate::events::{EventBus, EventReceiver, SpaceEvent};
use crate::membership::RoomMembership;
use crate::overlay::TransitionOverlay;
use crate::scene::{EntityDesc, EntityKind, EntityRecord, PortalDesc, Scene};
use crate::settings::QuantumSettings;

/// A spawned portal renderer and the placement it was registered with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PortalBinding {
    /// Entity drawing the portal.
    pub entity: EntityId,
    /// Placement handed to the tracker.
    pub placement: PortalPlacement,
}

/// Collects pass notifications in delivery order.
#[derive(Debug, Default)]
struct PassRecorder {
    /// `None` for hidden rooms.
    rooms: Vec<(RoomId, Option<LayerMask>)>,
}

impl LayerObserver for PassRecorder {
    fn room_hidden(&mut self, room: RoomId) {
        self.rooms.push((room, None));
    }

    fn layer_mask_applied(&mut self, room: RoomId, mask: LayerMask, _is_active: bool) {
        self.rooms.push((room, Some(mask)));
    }
}

/// Clip transforms of the portals each nested layer is seen through.
struct PortalClips<'a> {
    engine: &'a LayerAssignmentEngine,
    portals: &'a HashMap<PortalId, PortalBinding>,
}

impl ClipSource for PortalClips<'_> {
    fn portal_clip_matrix(&self, layer: usize) -> Option<Mat4> {
        let portal = self.engine.portal_leading_to_layer(layer)?;
        self.portals
            .get(&portal)
            .map(|binding| binding.placement.frame.world_to_local())
    }
}

/// The compressed-space service.
pub struct CompressedSpace {
    /// Startup settings.
    settings: QuantumSettings,
    /// Editable graph the engine was built from.
    graph: RoomGraph,
    /// BFS layer assignment.
    engine: LayerAssignmentEngine,
    /// Per-layer variants.
    registry: MaterialVariantRegistry,
    /// Crossing state machine.
    tracker: PortalCrossingTracker,
    /// Entities.
    scene: Scene,
    /// Room subscriptions.
    membership: RoomMembership,
    /// Spawned portal renderers.
    portals: HashMap<PortalId, PortalBinding>,
    /// Visibility reported for each room, `None` when hidden.
    room_states: HashMap<RoomId, Option<LayerMask>>,
    /// Viewpoint transition overlay.
    overlay: TransitionOverlay,
    /// Last viewpoint position.
    viewpoint: Option<Vec3>,
    /// Outward events.
    events: EventBus,
    /// A layer pass has run.
    started: bool,
}

impl CompressedSpace {
    /// Builds the service for a level.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid, the graph is malformed or
    /// has no start room.
    pub fn new(mut graph: RoomGraph, settings: QuantumSettings) -> SpaceResult<Self> {
        settings.validate()?;
        let runtime = RuntimeGraph::build(&graph)?;
        if runtime.start_room().is_none() {
            return Err(GraphError::ActiveRoomUnset.into());
        }
        let engine = LayerAssignmentEngine::new(runtime, settings.max_layers)?;
        let registry = MaterialVariantRegistry::new(settings.render_queues.clone(), settings.max_layers)?;
        let tracker = PortalCrossingTracker::new(settings.tracker_config());

        // Creation notifications describe the loaded level, not runtime edits.
        let pending = graph.drain_events().len();
        debug!(pending, "Discarded graph construction events");

        info!(
            rooms = graph.room_count(),
            portals = graph.portal_count(),
            max_layers = settings.max_layers,
            "Compressed space created"
        );

        Ok(Self {
            overlay: TransitionOverlay::hidden(settings.depth_clear_queue),
            events: EventBus::new(settings.event_capacity),
            settings,
            graph,
            engine,
            registry,
            tracker,
            scene: Scene::new(),
            membership: RoomMembership::new(),
            portals: HashMap::new(),
            room_states: HashMap::new(),
            viewpoint: None,
            started: false,
        })
    }

    // =========================================================================
    // Layer passes
    // =========================================================================

    /// Runs the first layer pass from the start room.
    ///
    /// # Errors
    ///
    /// Returns `ActiveRoomUnset` if the graph has no start room.
    pub fn start(&mut self) -> SpaceResult<LayerPassSummary> {
        let room = self.graph.start_room().ok_or(GraphError::ActiveRoomUnset)?;
        self.change_active_room(room)
    }

    /// Makes `room` the active room and re-runs the layer pass.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` if `room` is not in the graph. Nothing changes
    /// in that case.
    pub fn change_active_room(&mut self, room: RoomId) -> SpaceResult<LayerPassSummary> {
        let previous = if self.started { self.engine.active_room() } else { None };
        self.run_pass(room, previous)
    }

    fn run_pass(&mut self, room: RoomId, previous: Option<RoomId>) -> SpaceResult<LayerPassSummary> {
        if self.engine.graph().node_index(room).is_none() {
            return Err(SpaceError::UnknownRoom(room));
        }

        self.registry.begin_pass();
        let mut recorder = PassRecorder::default();
        let summary = self.engine.recompute(room, &mut recorder)?;
        self.started = true;

        for &(notified, _) in &recorder.rooms {
            for member in self.membership.members(notified) {
                self.refresh_entity(member);
            }
        }
        let report = self.registry.end_pass();
        self.refresh_overlay();

        for (notified, state) in recorder.rooms {
            if self.room_states.get(&notified) == Some(&state) {
                continue;
            }
            self.room_states.insert(notified, state);
            match state {
                Some(mask) => self.events.emit(SpaceEvent::RoomShown { room: notified, mask }),
                None => self.events.emit(SpaceEvent::RoomHidden { room: notified }),
            };
        }
        self.events.emit(SpaceEvent::ActiveRoomChanged { previous, room });
        self.events.emit(SpaceEvent::LayerPassCompleted {
            visible_rooms: summary.visible_rooms,
            disposed_variants: report.disposed_variants,
        });

        info!(
            room = %room,
            visible = summary.visible_rooms,
            hidden = summary.hidden_rooms,
            disposed = report.disposed_variants,
            "Active room changed"
        );
        Ok(summary)
    }

    fn refresh_overlay(&mut self) {
        if let Some(portal) = self.overlay.portal.filter(|_| self.overlay.visible) {
            let target_layer = self.engine.portal_target_layer(portal, 0);
            let clip = self.portal_clip(portal);
            self.overlay.retarget(target_layer, clip);
        }
    }

    fn portal_clip(&self, portal: PortalId) -> Option<Mat4> {
        self.portals
            .get(&portal)
            .map(|binding| binding.placement.frame.world_to_local())
    }

    // =========================================================================
    // Member refresh
    // =========================================================================

    fn refresh_subtree(&mut self, root: EntityId) {
        if !self.started {
            return;
        }
        for entity in self.scene.subtree(root) {
            self.refresh_entity(entity);
        }
    }

    /// Recomputes one entity's variants, activity and collision layer from its
    /// room's mask (blended with the traversed room's, if any).
    fn refresh_entity(&mut self, id: EntityId) {
        let Some(record) = self.scene.get(id) else {
            return;
        };
        let traversal = effective_traversal(&self.scene, &self.tracker, id);
        let own_mask = self.engine.layer_mask(record.room).unwrap_or(LayerMask::EMPTY);
        let own_active = self.engine.is_active_room(record.room);
        let (mask, in_active) = match traversal {
            Some(t) => (
                own_mask | self.engine.layer_mask(t.target_room).unwrap_or(LayerMask::EMPTY),
                own_active || self.engine.is_active_room(t.target_room),
            ),
            None => (own_mask, own_active),
        };

        let mut layers = Vec::with_capacity(mask.layer_count() as usize + 1);
        if in_active {
            layers.push(0);
        }
        layers.extend(mask.layers());

        self.registry.dispose_transitions(id);

        if layers.is_empty() {
            if let Some(record) = self.scene.get_mut(id) {
                record.active = false;
                record.applied.clear();
            }
            return;
        }

        let clips = PortalClips {
            engine: &self.engine,
            portals: &self.portals,
        };
        let mut applied = Vec::new();
        match &record.kind {
            EntityKind::Object { materials } => {
                for base in materials {
                    for &layer in &layers {
                        let request = VariantRequest::on_layer(layer);
                        let result = match traversal {
                            Some(t) => {
                                let crossing = Traversal {
                                    entity: id,
                                    portal: t.portal,
                                    world_to_portal: self
                                        .portals
                                        .get(&t.portal)
                                        .map_or(Mat4::IDENTITY, |b| b.placement.frame.world_to_local()),
                                    belongs_to_layer: (layer == 0 && own_active) || own_mask.contains_layer(layer),
                                };
                                self.registry.create_transition(base, request, crossing, &clips)
                            }
                            None => self.registry.get_or_create(base, request, &clips),
                        };
                        applied.push(resolve_variant(&mut self.registry, id, base, result));
                    }
                }
            }
            EntityKind::Portal { portal, materials } => {
                for &layer in &layers {
                    if self.engine.is_portal_disabled_on_layer(*portal, layer) {
                        continue;
                    }
                    let target = self.engine.portal_target_layer(*portal, layer);
                    let passes = [
                        (&materials.stencil, VariantRequest::on_layer(layer).targeting(target)),
                        (&materials.surface, VariantRequest::on_layer(layer)),
                        (&materials.view, VariantRequest::on_layer(layer).targeting(target)),
                    ];
                    for (base, request) in passes {
                        let result = self.registry.get_or_create(base, request, &clips);
                        applied.push(resolve_variant(&mut self.registry, id, base, result));
                    }
                }
            }
        }

        let collision_layer = if in_active {
            record.original_collision_layer
        } else {
            mask.lowest_layer()
                .and_then(|layer| self.settings.collision_layer_for(layer))
                .unwrap_or(record.original_collision_layer)
        };

        if let Some(record) = self.scene.get_mut(id) {
            record.renderer_enabled = !applied.is_empty();
            record.applied = applied;
            record.collision_layer = collision_layer;
            record.active = true;
        }
    }

    fn dispose_transitions(&mut self, entity: EntityId, portal: Option<PortalId>) {
        let mut targets = self.scene.subtree(entity);
        if targets.is_empty() {
            targets.push(entity);
        }
        for target in targets {
            match portal {
                Some(portal) => self.registry.dispose_transitions_for(target, portal),
                None => self.registry.dispose_transitions(target),
            };
        }
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Spawns an entity.
    ///
    /// Children join their parent's room; player parts join the start room.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent or room does not exist.
    pub fn spawn(&mut self, desc: EntityDesc) -> SpaceResult<EntityId> {
        let room = if desc.is_player_part {
            self.graph.start_room().ok_or(GraphError::ActiveRoomUnset)?
        } else if let Some(parent) = desc.parent {
            self.scene.get(parent).ok_or(SpaceError::UnknownEntity(parent))?.room
        } else {
            desc.room
        };
        if let Some(parent) = desc.parent {
            if !self.scene.contains(parent) {
                return Err(SpaceError::UnknownEntity(parent));
            }
        }
        self.require_room(room)?;

        let mut record = EntityRecord::new(
            desc.name,
            room,
            desc.position,
            EntityKind::Object {
                materials: desc.materials,
            },
            desc.collision_layer,
        );
        record.is_static = desc.is_static;
        record.is_player_part = desc.is_player_part;

        let id = self.insert_entity(record, desc.parent);
        self.refresh_subtree(id);
        debug!(entity = %id, room = %room, "Entity spawned");
        Ok(id)
    }

    /// Spawns the renderer of a graph portal and starts tracking crossings.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal is unknown, already spawned, or has an
    /// invalid size.
    pub fn spawn_portal(&mut self, desc: PortalDesc) -> SpaceResult<EntityId> {
        let record = *self
            .graph
            .portal(desc.portal)
            .ok_or(GraphError::UnknownPortal(desc.portal))?;
        if self.portals.contains_key(&desc.portal) {
            return Err(SpaceError::PortalAlreadySpawned(desc.portal));
        }

        let placement = PortalPlacement {
            id: record.id,
            reverse: record.reverse,
            source_room: record.source,
            target_room: record.target,
            frame: desc.frame,
            width: desc.width,
            height: desc.height,
        };
        self.tracker.register_portal(placement)?;

        let mut entity = EntityRecord::new(
            format!("portal {}", desc.portal),
            record.source,
            desc.frame.position,
            EntityKind::Portal {
                portal: desc.portal,
                materials: desc.materials,
            },
            0,
        );
        entity.is_static = true;

        let id = self.insert_entity(entity, None);
        self.portals.insert(desc.portal, PortalBinding { entity: id, placement });
        self.refresh_subtree(id);
        debug!(entity = %id, portal = %desc.portal, "Portal spawned");
        Ok(id)
    }

    fn insert_entity(&mut self, record: EntityRecord, parent: Option<EntityId>) -> EntityId {
        let room = record.room;
        let id = self.scene.insert(record);
        if parent.is_some() {
            self.scene.relink(id, parent);
        }
        let handle = self.membership.subscribe(room, id);
        if let Some(record) = self.scene.get_mut(id) {
            record.membership = Some(handle);
        }
        id
    }

    /// Destroys an entity and its subtree, dropping all tracking and
    /// transition variants.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if the entity does not exist.
    pub fn destroy(&mut self, entity: EntityId) -> SpaceResult<()> {
        if !self.scene.contains(entity) {
            return Err(SpaceError::UnknownEntity(entity));
        }

        let mut events = self.tracker.abort(entity, &self.scene);
        let subtree = self.scene.subtree(entity);
        for &member in &subtree {
            self.registry.dispose_transitions(member);
            if let Some(portal) = self.scene.get(member).and_then(EntityRecord::portal) {
                self.portals.remove(&portal);
                if self.tracker.volume(portal).is_some() {
                    events.extend(self.tracker.unregister_portal(portal)?);
                }
            }
        }

        self.scene.relink(entity, None);
        for &member in &subtree {
            if let Some(handle) = self.scene.remove(member).and_then(|record| record.membership) {
                self.membership.unsubscribe(handle);
            }
        }
        self.apply_crossing_events(&events)?;

        debug!(entity = %entity, count = subtree.len(), "Entity destroyed");
        Ok(())
    }

    /// Moves an entity (and its subtree) so its pivot is at `position`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity`, or `PortalCannotMove` for portal renderers.
    pub fn move_entity(&mut self, entity: EntityId, position: Vec3) -> SpaceResult<()> {
        let record = self.scene.get(entity).ok_or(SpaceError::UnknownEntity(entity))?;
        if record.portal().is_some() {
            return Err(SpaceError::PortalCannotMove(entity));
        }
        let delta = position - record.position;
        for member in self.scene.subtree(entity) {
            if let Some(record) = self.scene.get_mut(member) {
                if record.portal().is_none() {
                    record.position += delta;
                }
            }
        }
        Ok(())
    }

    /// Moves an entity without passing through space: tracking is aborted
    /// first.
    ///
    /// # Errors
    ///
    /// As [`CompressedSpace::move_entity`].
    pub fn teleport(&mut self, entity: EntityId, position: Vec3) -> SpaceResult<()> {
        if !self.scene.contains(entity) {
            return Err(SpaceError::UnknownEntity(entity));
        }
        let events = self.tracker.abort(entity, &self.scene);
        self.move_entity(entity, position)?;
        self.apply_crossing_events(&events)
    }

    /// Re-parents an entity. Tracking is reconciled immediately.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity`, or `ParentCycle` if `parent` sits below
    /// `entity`.
    pub fn set_parent(&mut self, entity: EntityId, parent: Option<EntityId>) -> SpaceResult<()> {
        if !self.scene.contains(entity) {
            return Err(SpaceError::UnknownEntity(entity));
        }
        if let Some(parent) = parent {
            if !self.scene.contains(parent) {
                return Err(SpaceError::UnknownEntity(parent));
            }
            if self.scene.is_descendant_of(parent, entity) {
                return Err(SpaceError::ParentCycle { entity, parent });
            }
        }

        self.scene.relink(entity, parent);
        let events = self.tracker.entity_reparented(entity, &self.scene);
        self.apply_crossing_events(&events)?;
        self.refresh_subtree(entity);
        Ok(())
    }

    /// Moves an entity (and its non-player descendants) to another room.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity`, `UnknownRoom`, or `PortalCannotMove`.
    pub fn set_room(&mut self, entity: EntityId, room: RoomId) -> SpaceResult<()> {
        self.assign_room(entity, room, None)?;
        self.refresh_subtree(entity);
        Ok(())
    }

    fn assign_room(&mut self, entity: EntityId, room: RoomId, via: Option<PortalId>) -> SpaceResult<()> {
        let record = self.scene.get(entity).ok_or(SpaceError::UnknownEntity(entity))?;
        if record.portal().is_some() {
            return Err(SpaceError::PortalCannotMove(entity));
        }
        let from = record.room;
        self.require_room(room)?;
        if from == room {
            return Ok(());
        }

        let mut stack = vec![entity];
        while let Some(member) = stack.pop() {
            let Some(record) = self.scene.get_mut(member) else {
                continue;
            };
            if member != entity && (record.is_player_part || record.portal().is_some()) {
                continue;
            }
            record.room = room;
            if let Some(handle) = record.membership.take() {
                self.membership.unsubscribe(handle);
            }
            record.membership = Some(self.membership.subscribe(room, member));
            stack.extend(record.children.iter().copied());
        }

        self.events.emit(SpaceEvent::EntityRoomChanged {
            entity,
            from,
            to: room,
            via,
        });
        info!(entity = %entity, from = %from, to = %room, "Entity changed room");
        Ok(())
    }

    fn require_room(&self, room: RoomId) -> SpaceResult<()> {
        if self.engine.graph().node_index(room).is_some() {
            Ok(())
        } else {
            Err(SpaceError::UnknownRoom(room))
        }
    }

    // =========================================================================
    // Physics and viewpoint input
    // =========================================================================

    /// A collider entered a portal's trigger volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal has no renderer.
    pub fn collider_entered(&mut self, portal: PortalId, collider: Collider) -> SpaceResult<()> {
        let events = self.tracker.collider_entered(portal, collider, &self.scene)?;
        self.apply_crossing_events(&events)
    }

    /// A collider left a portal's trigger volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal has no renderer.
    pub fn collider_exited(&mut self, portal: PortalId, collider: Collider) -> SpaceResult<()> {
        let events = self.tracker.collider_exited(portal, collider, &self.scene)?;
        self.apply_crossing_events(&events)
    }

    /// Updates the viewpoint position used by the next tick.
    pub fn set_viewpoint(&mut self, position: Vec3) {
        self.viewpoint = Some(position);
    }

    /// The viewpoint entered a portal's trigger volume.
    ///
    /// # Errors
    ///
    /// Returns `ViewpointUnset` before [`CompressedSpace::set_viewpoint`], or
    /// an error if the portal has no renderer.
    pub fn viewpoint_entered(&mut self, portal: PortalId) -> SpaceResult<()> {
        let position = self.viewpoint.ok_or(SpaceError::ViewpointUnset)?;
        self.tracker.viewpoint_entered(portal, position)?;
        Ok(())
    }

    /// The viewpoint left a portal's trigger volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal has no renderer.
    pub fn viewpoint_exited(&mut self, portal: PortalId) -> SpaceResult<()> {
        let events = self.tracker.viewpoint_exited(portal)?;
        self.apply_crossing_events(&events)
    }

    /// Runs one crossing tick and applies its outcome.
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` before the first layer pass.
    pub fn tick(&mut self) -> SpaceResult<Vec<CrossingEvent>> {
        if !self.started {
            return Err(SpaceError::NotStarted);
        }
        let events = self.tracker.tick(&self.scene, self.viewpoint);
        self.apply_crossing_events(&events)?;
        Ok(events)
    }

    /// Drops all tracking of an entity (and its subtree) and disposes its
    /// transition variants.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if the entity does not exist.
    pub fn abort_traversal(&mut self, entity: EntityId) -> SpaceResult<()> {
        if !self.scene.contains(entity) {
            return Err(SpaceError::UnknownEntity(entity));
        }
        let events = self.tracker.abort(entity, &self.scene);
        self.apply_crossing_events(&events)
    }

    /// Turns portal traversal on or off. Turning it off aborts every
    /// traversal and the viewpoint overlay.
    ///
    /// # Errors
    ///
    /// Propagates errors from re-applying materials.
    pub fn set_traversal_enabled(&mut self, enabled: bool) -> SpaceResult<()> {
        let events = self.tracker.set_enabled(enabled);
        self.apply_crossing_events(&events)
    }

    fn apply_crossing_events(&mut self, events: &[CrossingEvent]) -> SpaceResult<()> {
        let mut dirty = Vec::new();
        for &event in events {
            match event {
                CrossingEvent::EnteredReach { .. } | CrossingEvent::Released { .. } => {}
                CrossingEvent::TraversalStarted { entity, portal, .. } => {
                    dirty.push(entity);
                    self.events.emit(SpaceEvent::TraversalStarted { entity, portal });
                }
                CrossingEvent::TraversalEnded { entity, portal } => {
                    self.dispose_transitions(entity, Some(portal));
                    dirty.push(entity);
                    self.events.emit(SpaceEvent::TraversalEnded { entity, portal });
                }
                CrossingEvent::Crossed {
                    entity, portal, to_room, ..
                } => {
                    self.dispose_transitions(entity, Some(portal));
                    self.assign_room(entity, to_room, Some(portal))?;
                    dirty.push(entity);
                }
                CrossingEvent::Aborted { entity, portal } => {
                    self.dispose_transitions(entity, None);
                    dirty.push(entity);
                    self.events.emit(SpaceEvent::TraversalAborted { entity, portal });
                }
                CrossingEvent::ViewpointTransitionStarted { portal, target_room } => {
                    let target_layer = self.engine.portal_target_layer(portal, 0);
                    let clip = self.portal_clip(portal);
                    self.overlay.show(portal, target_room, target_layer, clip);
                    self.events.emit(SpaceEvent::OverlayToggled { visible: true, portal });
                }
                CrossingEvent::ViewpointTransitionPaused { portal } => {
                    self.overlay.paused = true;
                    self.events.emit(SpaceEvent::OverlayPaused { portal, paused: true });
                }
                CrossingEvent::ViewpointTransitionResumed { portal } => {
                    self.overlay.paused = false;
                    self.events.emit(SpaceEvent::OverlayPaused { portal, paused: false });
                }
                CrossingEvent::ViewpointTransitionEnded { portal } => {
                    if self.overlay.portal == Some(portal) {
                        self.overlay.hide();
                    }
                    self.events.emit(SpaceEvent::OverlayToggled { visible: false, portal });
                }
                CrossingEvent::ActiveRoomChange { room, .. } => {
                    self.change_active_room(room)?;
                }
            }
        }

        dirty.sort_unstable();
        dirty.dedup();
        for entity in dirty {
            self.refresh_subtree(entity);
        }
        Ok(())
    }

    // =========================================================================
    // Graph edits
    // =========================================================================

    /// Applies an edit to the room graph.
    ///
    /// The edit runs on a copy; the live graph is only replaced if the result
    /// validates. Portal renderers follow retargeted portals and are destroyed
    /// with deleted ones. A started space re-runs its layer pass.
    ///
    /// # Errors
    ///
    /// Returns the edit's error, a validation error, or `RoomInUse` when a
    /// removed room still has entities.
    pub fn edit_graph<F>(&mut self, edit: F) -> SpaceResult<()>
    where
        F: FnOnce(&mut RoomGraph) -> GraphResult<()>,
    {
        let mut graph = self.graph.clone();
        edit(&mut graph)?;
        let runtime = RuntimeGraph::build(&graph)?;
        for room in self.membership.occupied_rooms() {
            if graph.room(room).is_some() {
                continue;
            }
            // Renderers of portals deleted with the room go away with it.
            let occupied = self.membership.members(room).into_iter().any(|member| {
                self.scene
                    .get(member)
                    .and_then(EntityRecord::portal)
                    .map_or(true, |portal| graph.portal(portal).is_some())
            });
            if occupied {
                return Err(SpaceError::RoomInUse(room));
            }
        }
        let engine = LayerAssignmentEngine::new(runtime, self.settings.max_layers)?;

        let previous = if self.started { self.engine.active_room() } else { None };
        let changes = graph.drain_events();
        self.graph = graph;
        self.engine = engine;
        let graph = &self.graph;
        self.room_states.retain(|room, _| graph.room(*room).is_some());

        for change in changes {
            let event = match change {
                PortalEvent::Added { room, portal, reverse } => SpaceEvent::PortalAdded { room, portal, reverse },
                PortalEvent::Removed { room, portal, reverse } => SpaceEvent::PortalRemoved { room, portal, reverse },
            };
            self.events.emit(event);
        }

        let mut bindings: Vec<(PortalId, PortalBinding)> = self.portals.iter().map(|(k, v)| (*k, *v)).collect();
        bindings.sort_by_key(|(portal, _)| *portal);

        let mut events = Vec::new();
        let mut orphaned = Vec::new();
        for (portal, binding) in bindings {
            match self.graph.portal(portal).copied() {
                None => orphaned.push(binding.entity),
                Some(record)
                    if record.target != binding.placement.target_room
                        || record.reverse != binding.placement.reverse =>
                {
                    events.extend(self.tracker.unregister_portal(portal)?);
                    let placement = PortalPlacement {
                        target_room: record.target,
                        reverse: record.reverse,
                        ..binding.placement
                    };
                    self.tracker.register_portal(placement)?;
                    self.portals.insert(portal, PortalBinding { placement, ..binding });
                    debug!(portal = %portal, target = %record.target, "Portal renderer retargeted");
                }
                Some(_) => {}
            }
        }
        for entity in orphaned {
            if self.scene.contains(entity) {
                self.destroy(entity)?;
            }
        }
        self.apply_crossing_events(&events)?;

        if self.started {
            let room = previous
                .filter(|room| self.graph.room(*room).is_some())
                .or_else(|| self.graph.start_room())
                .ok_or(GraphError::ActiveRoomUnset)?;
            self.run_pass(room, previous)?;
        }

        info!(
            rooms = self.graph.room_count(),
            portals = self.graph.portal_count(),
            "Room graph edited"
        );
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Startup settings.
    #[must_use]
    pub const fn settings(&self) -> &QuantumSettings {
        &self.settings
    }

    /// The room graph.
    #[must_use]
    pub const fn graph(&self) -> &RoomGraph {
        &self.graph
    }

    /// The layering engine.
    #[must_use]
    pub const fn engine(&self) -> &LayerAssignmentEngine {
        &self.engine
    }

    /// The variant registry.
    #[must_use]
    pub const fn registry(&self) -> &MaterialVariantRegistry {
        &self.registry
    }

    /// The crossing tracker.
    #[must_use]
    pub const fn tracker(&self) -> &PortalCrossingTracker {
        &self.tracker
    }

    /// The scene.
    #[must_use]
    pub const fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Entity by id.
    #[must_use]
    pub fn entity(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.scene.get(entity)
    }

    /// Room an entity belongs to.
    #[must_use]
    pub fn room_of(&self, entity: EntityId) -> Option<RoomId> {
        self.scene.get(entity).map(EntityRecord::room)
    }

    /// Members of a room in subscription order.
    #[must_use]
    pub fn members(&self, room: RoomId) -> Vec<EntityId> {
        self.membership.members(room)
    }

    /// Active room, once started.
    #[must_use]
    pub fn active_room(&self) -> Option<RoomId> {
        self.engine.active_room()
    }

    /// Layer mask of a room from the last pass.
    #[must_use]
    pub fn layer_mask(&self, room: RoomId) -> Option<LayerMask> {
        self.engine.layer_mask(room)
    }

    /// Whether a room was visible after the last pass.
    #[must_use]
    pub fn is_room_visible(&self, room: RoomId) -> bool {
        self.engine.is_visible(room)
    }

    /// Traversal affecting an entity, inherited from the nearest traversing
    /// ancestor.
    #[must_use]
    pub fn traversal_of(&self, entity: EntityId) -> Option<ActiveTraversal> {
        effective_traversal(&self.scene, &self.tracker, entity)
    }

    /// Entity drawing `portal`.
    #[must_use]
    pub fn portal_entity(&self, portal: PortalId) -> Option<EntityId> {
        self.portals.get(&portal).map(|binding| binding.entity)
    }

    /// Viewpoint transition overlay.
    #[must_use]
    pub const fn overlay(&self) -> &TransitionOverlay {
        &self.overlay
    }

    /// Last viewpoint position.
    #[must_use]
    pub const fn viewpoint(&self) -> Option<Vec3> {
        self.viewpoint
    }

    /// Whether a layer pass has run.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// New receiver of outward events.
    #[must_use]
    pub fn events(&self) -> EventReceiver {
        self.events.receiver()
    }
}

/// Nearest traversal on `entity` or one of its ancestors.
fn effective_traversal(scene: &Scene, tracker: &PortalCrossingTracker, entity: EntityId) -> Option<ActiveTraversal> {
    let mut current = Some(entity);
    while let Some(member) = current {
        if let Some(traversal) = tracker.traversal(member) {
            return Some(traversal);
        }
        current = SceneView::parent(scene, member);
    }
    None
}

/// Falls back to the unmodified original when a variant cannot be made.
fn resolve_variant(
    registry: &mut MaterialVariantRegistry,
    entity: EntityId,
    base: &BaseMaterial,
    result: MaterialResult<Arc<MaterialVariant>>,
) -> Arc<MaterialVariant> {
    match result {
        Ok(variant) => variant,
        Err(error) => {
            warn!(entity = %entity, material = %base.name, %error, "Variant creation failed, using original");
            registry.fallback(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM_A: RoomId = RoomId::from_u128(1);
    const ROOM_B: RoomId = RoomId::from_u128(2);

    fn create_test_space() -> CompressedSpace {
        let mut graph = RoomGraph::new();
        graph.insert_room(ROOM_A, "A").unwrap();
        graph.insert_room(ROOM_B, "B").unwrap();
        graph
            .insert_portal_pair(ROOM_A, ROOM_B, PortalId::from_u128(10), PortalId::from_u128(11))
            .unwrap();
        graph.set_start_room(ROOM_A).unwrap();
        CompressedSpace::new(graph, QuantumSettings::default()).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let mut graph = RoomGraph::new();
        graph.insert_room(ROOM_A, "A").unwrap();
        graph.set_start_room(ROOM_A).unwrap();

        let mut settings = QuantumSettings::default();
        settings.max_layers = 12;
        assert!(matches!(
            CompressedSpace::new(graph, settings),
            Err(SpaceError::Settings(_))
        ));
    }

    #[test]
    fn test_new_requires_start_room() {
        let mut graph = RoomGraph::new();
        graph.insert_room(ROOM_A, "A").unwrap();
        assert!(matches!(
            CompressedSpace::new(graph, QuantumSettings::default()),
            Err(SpaceError::Graph(GraphError::ActiveRoomUnset))
        ));
    }

    #[test]
    fn test_spawn_placement_rules() {
        let mut space = create_test_space();
        space.start().unwrap();

        let parent = space.spawn(EntityDesc::new("parent", ROOM_B)).unwrap();
        let child = space.spawn(EntityDesc::new("child", ROOM_A).child_of(parent)).unwrap();
        let hand = space.spawn(EntityDesc::new("hand", ROOM_B).player_part()).unwrap();

        assert_eq!(space.room_of(child), Some(ROOM_B));
        assert_eq!(space.room_of(hand), Some(ROOM_A));
        assert_eq!(space.members(ROOM_B), vec![parent, child]);

        let missing = RoomId::from_u128(99);
        assert_eq!(
            space.spawn(EntityDesc::new("lost", missing)).unwrap_err(),
            SpaceError::UnknownRoom(missing)
        );
    }

    #[test]
    fn test_set_room_resubscribes() {
        let mut space = create_test_space();
        space.start().unwrap();
        let entity = space.spawn(EntityDesc::new("box", ROOM_A)).unwrap();
        let events = space.events();

        space.set_room(entity, ROOM_B).unwrap();
        assert!(space.members(ROOM_A).is_empty());
        assert_eq!(space.members(ROOM_B), vec![entity]);
        assert_eq!(
            events.drain(),
            vec![SpaceEvent::EntityRoomChanged {
                entity,
                from: ROOM_A,
                to: ROOM_B,
                via: None
            }]
        );
    }

    #[test]
    fn test_spawn_portal_twice_rejected() {
        let mut space = create_test_space();
        let desc = PortalDesc {
            portal: PortalId::from_u128(10),
            frame: quantum_shared::PortalFrame::IDENTITY,
            width: 2.0,
            height: 3.0,
            materials: crate::scene::PortalMaterials {
                stencil: BaseMaterial::object(quantum_shared::BaseMaterialId::new(1), "s", 2000),
                surface: BaseMaterial::object(quantum_shared::BaseMaterialId::new(2), "f", 2000),
                view: BaseMaterial::object(quantum_shared::BaseMaterialId::new(3), "v", 2000),
            },
        };

        let entity = space.spawn_portal(desc.clone()).unwrap();
        assert_eq!(space.portal_entity(PortalId::from_u128(10)), Some(entity));
        assert_eq!(
            space.spawn_portal(desc),
            Err(SpaceError::PortalAlreadySpawned(PortalId::from_u128(10)))
        );
        assert!(space.entity(entity).unwrap().is_static());
    }
}
