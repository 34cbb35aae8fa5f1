//! # Scene Store
//!
//! Entities of a compressed space: hierarchy, room, pivot position and the
//! materials they render with. Positions are world space; moving an entity
//! moves its subtree.

use std::collections::HashMap;
use std::sync::Arc;

use quantum_materials::{BaseMaterial, MaterialVariant};
use quantum_portals::SceneView;
use quantum_shared::{EntityId, PortalFrame, PortalId, RoomId, Vec3};

use crate::membership::MembershipHandle;

/// Base materials of a portal's three render passes.
#[derive(Clone, Debug, PartialEq)]
pub struct PortalMaterials {
    /// Writes the stencil bit of the layer seen through the portal.
    pub stencil: BaseMaterial,
    /// The visible surface.
    pub surface: BaseMaterial,
    /// View pass, also writing the target layer's bit.
    pub view: BaseMaterial,
}

/// What an entity renders as.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityKind {
    /// Ordinary geometry with its base materials.
    Object {
        /// Base materials of the entity's renderers.
        materials: Vec<BaseMaterial>,
    },
    /// The renderer of a portal.
    Portal {
        /// Portal the entity draws.
        portal: PortalId,
        /// Pass materials.
        materials: PortalMaterials,
    },
}

/// Description of an entity to spawn.
#[derive(Clone, Debug)]
pub struct EntityDesc {
    /// Display name.
    pub name: String,
    /// Room to place the entity in. Ignored for children and player parts.
    pub room: RoomId,
    /// World position of the pivot.
    pub position: Vec3,
    /// Parent entity.
    pub parent: Option<EntityId>,
    /// Base materials.
    pub materials: Vec<BaseMaterial>,
    /// Collision layer used while in the active room.
    pub collision_layer: u32,
    /// Static entities never traverse portals.
    pub is_static: bool,
    /// Player parts start in the start room and are not re-homed by a parent.
    pub is_player_part: bool,
}

impl EntityDesc {
    /// Movable entity in `room` at the origin.
    #[must_use]
    pub fn new(name: impl Into<String>, room: RoomId) -> Self {
        Self {
            name: name.into(),
            room,
            position: Vec3::ZERO,
            parent: None,
            materials: Vec::new(),
            collision_layer: 0,
            is_static: false,
            is_player_part: false,
        }
    }

    /// Sets the pivot position.
    #[must_use]
    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Places the entity under `parent`.
    #[must_use]
    pub fn child_of(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Adds a base material.
    #[must_use]
    pub fn with_material(mut self, material: BaseMaterial) -> Self {
        self.materials.push(material);
        self
    }

    /// Sets the collision layer used in the active room.
    #[must_use]
    pub fn with_collision_layer(mut self, layer: u32) -> Self {
        self.collision_layer = layer;
        self
    }

    /// Marks the entity static.
    #[must_use]
    pub fn static_entity(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Marks the entity as part of the player rig.
    #[must_use]
    pub fn player_part(mut self) -> Self {
        self.is_player_part = true;
        self
    }
}

/// Description of a portal renderer to spawn.
#[derive(Clone, Debug)]
pub struct PortalDesc {
    /// Portal from the room graph.
    pub portal: PortalId,
    /// Placement of the surface.
    pub frame: PortalFrame,
    /// Surface width.
    pub width: f32,
    /// Surface height.
    pub height: f32,
    /// Pass materials.
    pub materials: PortalMaterials,
}

/// One entity.
#[derive(Clone, Debug)]
pub struct EntityRecord {
    pub(crate) name: String,
    pub(crate) parent: Option<EntityId>,
    pub(crate) children: Vec<EntityId>,
    pub(crate) room: RoomId,
    pub(crate) position: Vec3,
    pub(crate) is_static: bool,
    pub(crate) is_player_part: bool,
    pub(crate) kind: EntityKind,
    pub(crate) original_collision_layer: u32,
    pub(crate) collision_layer: u32,
    pub(crate) active: bool,
    pub(crate) renderer_enabled: bool,
    pub(crate) applied: Vec<Arc<MaterialVariant>>,
    pub(crate) membership: Option<MembershipHandle>,
}

impl EntityRecord {
    pub(crate) fn new(name: String, room: RoomId, position: Vec3, kind: EntityKind, collision_layer: u32) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            room,
            position,
            is_static: false,
            is_player_part: false,
            kind,
            original_collision_layer: collision_layer,
            collision_layer,
            active: true,
            renderer_enabled: true,
            applied: Vec::new(),
            membership: None,
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent entity.
    #[must_use]
    pub const fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// Direct children.
    #[must_use]
    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    /// Room the entity belongs to.
    #[must_use]
    pub const fn room(&self) -> RoomId {
        self.room
    }

    /// World position of the pivot.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Whether the entity is static.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.is_static
    }

    /// Whether the entity is part of the player rig.
    #[must_use]
    pub const fn is_player_part(&self) -> bool {
        self.is_player_part
    }

    /// What the entity renders as.
    #[must_use]
    pub const fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Portal drawn by this entity, if it is a portal renderer.
    #[must_use]
    pub const fn portal(&self) -> Option<PortalId> {
        match &self.kind {
            EntityKind::Portal { portal, .. } => Some(*portal),
            EntityKind::Object { .. } => None,
        }
    }

    /// Current collision layer.
    #[must_use]
    pub const fn collision_layer(&self) -> u32 {
        self.collision_layer
    }

    /// Collision layer used in the active room.
    #[must_use]
    pub const fn original_collision_layer(&self) -> u32 {
        self.original_collision_layer
    }

    /// False while the entity's room (and traversed room) is hidden.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// False for portal renderers without any variant.
    #[must_use]
    pub const fn renderer_enabled(&self) -> bool {
        self.renderer_enabled
    }

    /// Variants the entity currently renders with.
    #[must_use]
    pub fn applied_materials(&self) -> &[Arc<MaterialVariant>] {
        &self.applied
    }
}

/// All entities of a space.
#[derive(Debug, Default)]
pub struct Scene {
    entities: HashMap<EntityId, EntityRecord>,
    next_index: u32,
}

impl Scene {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, record: EntityRecord) -> EntityId {
        let id = EntityId::new(self.next_index, 0);
        self.next_index += 1;
        self.entities.insert(id, record);
        id
    }

    pub(crate) fn remove(&mut self, entity: EntityId) -> Option<EntityRecord> {
        self.entities.remove(&entity)
    }

    /// Entity by id.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&entity)
    }

    pub(crate) fn get_mut(&mut self, entity: EntityId) -> Option<&mut EntityRecord> {
        self.entities.get_mut(&entity)
    }

    /// True if the entity exists.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if there are no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// `root` and all its descendants, parents before children. Empty if
    /// `root` does not exist.
    #[must_use]
    pub fn subtree(&self, root: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        if !self.contains(root) {
            return out;
        }
        let mut stack = vec![root];
        while let Some(entity) = stack.pop() {
            out.push(entity);
            if let Some(record) = self.entities.get(&entity) {
                stack.extend(record.children.iter().rev().copied());
            }
        }
        out
    }

    /// Links `child` under `parent` (or detaches it), keeping both sides of
    /// the hierarchy in sync. Cycles must be ruled out by the caller.
    pub(crate) fn relink(&mut self, child: EntityId, parent: Option<EntityId>) {
        let previous = self.entities.get(&child).and_then(|r| r.parent);
        if let Some(old) = previous.and_then(|p| self.entities.get_mut(&p)) {
            old.children.retain(|&c| c != child);
        }
        if let Some(new) = parent.and_then(|p| self.entities.get_mut(&p)) {
            new.children.push(child);
        }
        if let Some(record) = self.entities.get_mut(&child) {
            record.parent = parent;
        }
    }
}

impl SceneView for Scene {
    fn position(&self, entity: EntityId) -> Option<Vec3> {
        self.entities.get(&entity).map(|r| r.position)
    }

    fn parent(&self, entity: EntityId) -> Option<EntityId> {
        self.entities.get(&entity).and_then(|r| r.parent)
    }

    fn is_static(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).is_some_and(|r| r.is_static)
    }

    fn is_portal(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).is_some_and(|r| r.portal().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str) -> EntityRecord {
        EntityRecord::new(
            name.to_string(),
            RoomId::from_u128(1),
            Vec3::ZERO,
            EntityKind::Object { materials: Vec::new() },
            0,
        )
    }

    #[test]
    fn test_subtree_is_parent_first() {
        let mut scene = Scene::new();
        let root = scene.insert(object("root"));
        let a = scene.insert(object("a"));
        let b = scene.insert(object("b"));
        let c = scene.insert(object("c"));
        scene.relink(a, Some(root));
        scene.relink(b, Some(root));
        scene.relink(c, Some(a));

        assert_eq!(scene.subtree(root), vec![root, a, c, b]);
        assert_eq!(scene.subtree(a), vec![a, c]);
        assert!(scene.is_descendant_of(c, root));
        assert_eq!(scene.ancestors(c), vec![a, root]);
    }

    #[test]
    fn test_relink_moves_child() {
        let mut scene = Scene::new();
        let a = scene.insert(object("a"));
        let b = scene.insert(object("b"));
        let child = scene.insert(object("child"));
        scene.relink(child, Some(a));
        scene.relink(child, Some(b));

        assert!(scene.get(a).unwrap().children().is_empty());
        assert_eq!(scene.get(b).unwrap().children(), &[child]);
        assert_eq!(scene.get(child).unwrap().parent(), Some(b));

        scene.relink(child, None);
        assert!(scene.get(b).unwrap().children().is_empty());
        assert_eq!(SceneView::parent(&scene, child), None);
    }
}
