//! Viewpoint transition overlay.
//!
//! While the viewpoint sits behind a portal plane a full-screen quad shows the
//! target room's layer: it writes that layer's stencil bit and clips against
//! the traversed portal, after a depth clear at `depth_clear_queue`.

use quantum_shared::{LayerMask, Mat4, PortalId, RoomId};

/// State of the transition overlay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionOverlay {
    /// Overlay is drawn.
    pub visible: bool,
    /// Overlay is paused (viewpoint backed out or left the crossing box).
    pub paused: bool,
    /// Portal being traversed.
    pub portal: Option<PortalId>,
    /// Room the overlay shows.
    pub target_room: Option<RoomId>,
    /// Layer the portal leads into from the active room.
    pub target_layer: Option<usize>,
    /// Stencil bit written by the overlay.
    pub write_bit: u8,
    /// World-to-portal transform of the traversed portal.
    pub clip: Option<Mat4>,
    /// Render order of the depth clear quad.
    pub depth_clear_queue: i32,
}

impl TransitionOverlay {
    /// Hidden overlay.
    #[must_use]
    pub const fn hidden(depth_clear_queue: i32) -> Self {
        Self {
            visible: false,
            paused: false,
            portal: None,
            target_room: None,
            target_layer: None,
            write_bit: 0,
            clip: None,
            depth_clear_queue,
        }
    }

    pub(crate) fn show(&mut self, portal: PortalId, target_room: RoomId, target_layer: Option<usize>, clip: Option<Mat4>) {
        self.visible = true;
        self.paused = false;
        self.portal = Some(portal);
        self.target_room = Some(target_room);
        self.retarget(target_layer, clip);
    }

    pub(crate) fn retarget(&mut self, target_layer: Option<usize>, clip: Option<Mat4>) {
        self.target_layer = target_layer;
        self.write_bit = target_layer.map_or(0, |layer| LayerMask::for_layer(layer).bits());
        self.clip = clip;
    }

    pub(crate) fn hide(&mut self) {
        *self = Self::hidden(self.depth_clear_queue);
    }
}
