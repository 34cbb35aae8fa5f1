//! # Render Order Table
//!
//! Draw order per layer. Deeper layers draw their opaque geometry before
//! nearer ones; portal surfaces go the other way round.
//!
//! Entry `i` of the table describes layer `i`:
//! - `objects` - sub-range object render orders are squeezed into (ignored on
//!   layer 0, where objects keep their original order)
//! - `portal_surface` - surface order for portals seen on layer `i` (layer 0
//!   uses the global `active_layer_portal_surface_queue`)
//! - `portal_stencil` / `portal_view` - order of stencil and view passes of
//!   portals drawn on layer `i` (unused on the last layer, which has no deeper
//!   layer to write into)

use serde::{Deserialize, Serialize};

use crate::error::{MaterialError, MaterialResult};

/// Inclusive render order range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderQueueRange {
    /// Lowest value.
    pub low: i32,
    /// Highest value.
    pub high: i32,
}

impl RenderQueueRange {
    /// Every render order value a material may carry.
    pub const ALL: Self = Self::new(0, 5000);

    /// Creates a range.
    #[inline]
    #[must_use]
    pub const fn new(low: i32, high: i32) -> Self {
        Self { low, high }
    }

    /// True when `value` lies in the range.
    #[inline]
    #[must_use]
    pub const fn contains(&self, value: i32) -> bool {
        value >= self.low && value <= self.high
    }

    /// Linearly maps `value` from this range into `to`.
    ///
    /// Values outside this range are clamped first. Integer arithmetic,
    /// rounding toward `to.low`.
    #[must_use]
    pub fn remap(&self, value: i32, to: Self) -> i32 {
        let span = i64::from(self.high) - i64::from(self.low);
        if span <= 0 {
            return to.low;
        }
        let offset = i64::from(value.clamp(self.low, self.high)) - i64::from(self.low);
        let target_span = i64::from(to.high) - i64::from(to.low);
        let mapped = i64::from(to.low) + offset * target_span / span;
        i32::try_from(mapped).unwrap_or(to.low)
    }
}

/// Render orders of one layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerQueues {
    /// Object sub-range.
    pub objects: RenderQueueRange,
    /// Portal stencil pass.
    pub portal_stencil: i32,
    /// Portal surface.
    pub portal_surface: i32,
    /// Portal view pass.
    pub portal_view: i32,
}

/// Per-layer render order configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderQueueTable {
    /// Range original render orders live in.
    #[serde(default = "default_global_range")]
    pub global: RenderQueueRange,
    /// Surface order of portals in the active room.
    pub active_layer_portal_surface_queue: i32,
    /// One entry per layer, layer 0 first.
    pub layers: Vec<LayerQueues>,
}

fn default_global_range() -> RenderQueueRange {
    RenderQueueRange::ALL
}

impl RenderQueueTable {
    /// Generates the stock table for `max_layers` layers.
    #[must_use]
    pub fn default_for(max_layers: usize) -> Self {
        let layers = (0..max_layers)
            .map(|layer| {
                let depth = i32::try_from(layer).unwrap_or_default();
                let objects = if layer == 0 {
                    RenderQueueRange::ALL
                } else {
                    let low = 1000 - 100 * depth;
                    RenderQueueRange::new(low, low + 99)
                };
                LayerQueues {
                    objects,
                    portal_stencil: 100 + depth,
                    portal_surface: 1000 + depth,
                    portal_view: 1100 + depth,
                }
            })
            .collect();

        Self {
            global: RenderQueueRange::ALL,
            active_layer_portal_surface_queue: 1999,
            layers,
        }
    }

    /// Checks the table against a layer budget.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQueueTable` when the entry count differs from
    /// `max_layers` or a range is inverted or outside the global range.
    pub fn validate(&self, max_layers: usize) -> MaterialResult<()> {
        if self.layers.len() != max_layers {
            return Err(MaterialError::InvalidQueueTable(format!(
                "{} layer entries for {max_layers} layers",
                self.layers.len()
            )));
        }
        if self.global.low >= self.global.high {
            return Err(MaterialError::InvalidQueueTable(format!(
                "global range {}..{} is empty",
                self.global.low, self.global.high
            )));
        }
        for (layer, queues) in self.layers.iter().enumerate().skip(1) {
            let objects = queues.objects;
            if objects.low > objects.high {
                return Err(MaterialError::InvalidQueueTable(format!(
                    "layer {layer} object range {}..{} is inverted",
                    objects.low, objects.high
                )));
            }
            if !self.global.contains(objects.low) || !self.global.contains(objects.high) {
                return Err(MaterialError::InvalidQueueTable(format!(
                    "layer {layer} object range {}..{} leaves the global range",
                    objects.low, objects.high
                )));
            }
        }
        Ok(())
    }

    /// Queues of `layer`, if the table has it.
    #[must_use]
    pub fn layer(&self, layer: usize) -> Option<&LayerQueues> {
        self.layers.get(layer)
    }

    /// Object render order on nested layer `layer` for an original `queue`.
    #[must_use]
    pub fn object_queue(&self, queue: i32, layer: usize) -> i32 {
        match (layer, self.layers.get(layer)) {
            (0, _) | (_, None) => queue,
            (_, Some(queues)) => self.global.remap(queue, queues.objects),
        }
    }
}
