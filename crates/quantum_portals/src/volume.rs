//! Per-portal geometry and tracked sets.

use quantum_shared::{ColliderId, EntityId, Obb, PortalFrame, PortalId, RoomId, Vec3, PORTAL_DEPTH_PADDING};

use crate::scene::Collider;

/// Default camera near clip distance.
pub const DEFAULT_NEAR_CLIP: f32 = 0.01;

/// Default depth of the trigger volume behind a portal.
pub const DEFAULT_TRIGGER_DEPTH: f32 = 1.0;

/// Tracker tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Thickness of the precise crossing box.
    pub crossing_depth: f32,
    /// Depth of the trigger volume behind each portal.
    pub trigger_depth: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from_near_clip(DEFAULT_NEAR_CLIP, DEFAULT_TRIGGER_DEPTH)
    }
}

impl TrackerConfig {
    /// Crossing boxes are as thick as the near clip distance plus padding, so
    /// the viewpoint never clips into a portal surface unnoticed.
    #[must_use]
    pub fn from_near_clip(near_clip: f32, trigger_depth: f32) -> Self {
        Self {
            crossing_depth: near_clip + PORTAL_DEPTH_PADDING,
            trigger_depth,
        }
    }
}

/// Placement of one portal, as handed to the tracker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PortalPlacement {
    /// Portal id.
    pub id: PortalId,
    /// Paired portal in the target room.
    pub reverse: PortalId,
    /// Room the portal sits in.
    pub source_room: RoomId,
    /// Room the portal shows.
    pub target_room: RoomId,
    /// World placement of the surface.
    pub frame: PortalFrame,
    /// Surface width.
    pub width: f32,
    /// Surface height.
    pub height: f32,
}

/// An entity tracked by a portal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedEntity {
    /// Root of the tracked subtree.
    pub entity: EntityId,
    /// Portal-local position on the previous tick. `None` until the first tick.
    pub previous_local: Option<Vec3>,
}

/// Viewpoint tracking state of one portal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewpointWatch {
    /// Portal-local viewpoint position on the previous tick.
    pub previous_local: Vec3,
    /// The overlay of this portal is running.
    pub tracking: bool,
    /// The overlay is paused.
    pub paused: bool,
}

impl ViewpointWatch {
    pub(crate) const fn new(previous_local: Vec3) -> Self {
        Self {
            previous_local,
            tracking: false,
            paused: false,
        }
    }
}

/// One registered portal with its boxes and tracked sets.
#[derive(Clone, Debug)]
pub struct PortalVolume {
    pub(crate) placement: PortalPlacement,
    pub(crate) crossing_box: Obb,
    pub(crate) trigger_box: Obb,
    pub(crate) tracked: Vec<TrackedEntity>,
    pub(crate) contained: Vec<Collider>,
    pub(crate) viewpoint: Option<ViewpointWatch>,
}

impl PortalVolume {
    pub(crate) fn new(placement: PortalPlacement, config: &TrackerConfig) -> Self {
        let frame = &placement.frame;
        Self {
            crossing_box: Obb::around_portal(frame, placement.width, placement.height, config.crossing_depth),
            trigger_box: Obb::behind_portal(frame, placement.width, placement.height, config.trigger_depth),
            placement,
            tracked: Vec::new(),
            contained: Vec::new(),
            viewpoint: None,
        }
    }

    /// Portal id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> PortalId {
        self.placement.id
    }

    /// Placement the volume was registered with.
    #[inline]
    #[must_use]
    pub const fn placement(&self) -> &PortalPlacement {
        &self.placement
    }

    /// Precise box a crossing has to happen in.
    #[inline]
    #[must_use]
    pub const fn crossing_box(&self) -> &Obb {
        &self.crossing_box
    }

    /// Trigger volume on the source side.
    #[inline]
    #[must_use]
    pub const fn trigger_box(&self) -> &Obb {
        &self.trigger_box
    }

    /// Tracked entities in tracking order.
    #[must_use]
    pub fn tracked(&self) -> &[TrackedEntity] {
        &self.tracked
    }

    /// Colliders currently inside the trigger volume.
    #[must_use]
    pub fn contained(&self) -> &[Collider] {
        &self.contained
    }

    /// Viewpoint watch, if the viewpoint is in reach.
    #[must_use]
    pub const fn viewpoint(&self) -> Option<&ViewpointWatch> {
        self.viewpoint.as_ref()
    }

    /// True when the portal tracks `entity` itself.
    #[must_use]
    pub fn is_tracking(&self, entity: EntityId) -> bool {
        self.tracked.iter().any(|t| t.entity == entity)
    }

    /// Portal-local position of a world point.
    #[inline]
    #[must_use]
    pub fn to_local(&self, point: Vec3) -> Vec3 {
        self.placement.frame.to_local(point)
    }

    pub(crate) fn remove_record(&mut self, entity: EntityId) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|t| t.entity != entity);
        self.tracked.len() != before
    }

    pub(crate) fn remove_collider(&mut self, id: ColliderId) {
        self.contained.retain(|c| c.id != id);
    }

    pub(crate) const fn target_room(&self) -> RoomId {
        self.placement.target_room
    }
}
