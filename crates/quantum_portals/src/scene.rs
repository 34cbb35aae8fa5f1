//! Read-only scene access for the crossing tracker.

use quantum_shared::{ColliderId, EntityId, Vec3};

/// What the tracker needs to know about the scene.
///
/// Implemented by the space service over its entity store, and by small
/// fixtures in tests.
pub trait SceneView {
    /// World position of an entity's pivot, `None` if it no longer exists.
    fn position(&self, entity: EntityId) -> Option<Vec3>;

    /// Direct parent of an entity.
    fn parent(&self, entity: EntityId) -> Option<EntityId>;

    /// Static entities never traverse portals.
    fn is_static(&self, entity: EntityId) -> bool;

    /// True for entities that are portals themselves.
    fn is_portal(&self, entity: EntityId) -> bool;

    /// True when `entity` is `ancestor` or sits anywhere below it.
    fn is_descendant_of(&self, entity: EntityId, ancestor: EntityId) -> bool {
        let mut current = Some(entity);
        while let Some(e) = current {
            if e == ancestor {
                return true;
            }
            current = self.parent(e);
        }
        false
    }

    /// Parent chain from the direct parent up to the root.
    fn ancestors(&self, entity: EntityId) -> Vec<EntityId> {
        let mut chain = Vec::new();
        let mut current = self.parent(entity);
        while let Some(e) = current {
            chain.push(e);
            current = self.parent(e);
        }
        chain
    }
}

/// A physics collider overlapping a portal's trigger volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Collider {
    /// Collider handle.
    pub id: ColliderId,
    /// Entity the collider belongs to.
    pub owner: EntityId,
    /// Trigger colliders are ignored.
    pub is_trigger: bool,
}

impl Collider {
    /// Solid collider attached to `owner`.
    #[inline]
    #[must_use]
    pub const fn solid(id: ColliderId, owner: EntityId) -> Self {
        Self {
            id,
            owner,
            is_trigger: false,
        }
    }

    /// Trigger collider attached to `owner`.
    #[inline]
    #[must_use]
    pub const fn trigger(id: ColliderId, owner: EntityId) -> Self {
        Self {
            id,
            owner,
            is_trigger: true,
        }
    }
}
