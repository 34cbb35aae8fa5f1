//! Material variant descriptors.
//!
//! A variant is the original material plus the few properties the layering
//! scheme overrides: render order, stencil read/write bits and the portal
//! clip transforms. Descriptors never change after creation.

use bytemuck::{Pod, Zeroable};
use quantum_shared::{BaseMaterialId, Mat4, PortalId};
use std::fmt;

/// What a base material is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    /// Regular geometry.
    Object,
    /// Portal pass that writes the target layer's stencil bit.
    PortalStencil,
    /// Visible portal surface.
    PortalSurface,
    /// Portal pass drawn after the nested layer.
    PortalView,
}

impl MaterialKind {
    /// True for the two passes that write into the stencil buffer.
    #[inline]
    #[must_use]
    pub const fn writes_stencil(self) -> bool {
        matches!(self, Self::PortalStencil | Self::PortalView)
    }
}

/// An original material as authored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseMaterial {
    /// Handle.
    pub id: BaseMaterialId,
    /// Authoring name.
    pub name: String,
    /// Original render order.
    pub render_queue: i32,
    /// Usage.
    pub kind: MaterialKind,
}

impl BaseMaterial {
    /// Creates a base material.
    #[must_use]
    pub fn new(id: BaseMaterialId, name: impl Into<String>, render_queue: i32, kind: MaterialKind) -> Self {
        Self {
            id,
            name: name.into(),
            render_queue,
            kind,
        }
    }

    /// Shorthand for an object material.
    #[must_use]
    pub fn object(id: BaseMaterialId, name: impl Into<String>, render_queue: i32) -> Self {
        Self::new(id, name, render_queue, MaterialKind::Object)
    }
}

/// Which half of a traversing entity a transition variant keeps.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipMode {
    /// No traversal clipping.
    Off = 0,
    /// Keep the part behind the traversed portal (the side the layer belongs to).
    KeepBehind = 1,
    /// Keep the part in front of the traversed portal.
    KeepFront = 2,
}

/// Clip data of a transition variant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraversalClip {
    /// Portal being traversed.
    pub portal: PortalId,
    /// World-to-local transform of that portal.
    pub world_to_portal: Mat4,
    /// Half to keep.
    pub mode: ClipMode,
}

/// Immutable configured material.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialVariant {
    /// Original material.
    pub base: BaseMaterialId,
    /// Diagnostic name.
    pub name: String,
    /// Usage of the original.
    pub kind: MaterialKind,
    /// Layer the variant renders on.
    pub layer: usize,
    /// Render order.
    pub render_queue: i32,
    /// Stencil read mask; 0 on layer 0.
    pub masking_bit: u8,
    /// Stencil write mask; only stencil/view passes write.
    pub write_bit: u8,
    /// Clip transform of the portal the layer is seen through.
    pub world_to_portal: Option<Mat4>,
    /// Present on transition variants only.
    pub traversal: Option<TraversalClip>,
}

impl MaterialVariant {
    /// The original material with nothing overridden.
    #[must_use]
    pub fn original(base: &BaseMaterial) -> Self {
        Self {
            base: base.id,
            name: base.name.clone(),
            kind: base.kind,
            layer: 0,
            render_queue: base.render_queue,
            masking_bit: 0,
            write_bit: 0,
            world_to_portal: None,
            traversal: None,
        }
    }

    /// True for per-entity transition copies.
    #[inline]
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        self.traversal.is_some()
    }

    /// Packs the overridden properties for upload.
    #[must_use]
    pub fn uniforms(&self) -> VariantUniforms {
        let identity = Mat4::IDENTITY.to_cols_array_2d();
        VariantUniforms {
            world_to_portal: self.world_to_portal.map_or(identity, |m| m.to_cols_array_2d()),
            world_to_portal_traversing: self
                .traversal
                .map_or(identity, |t| t.world_to_portal.to_cols_array_2d()),
            masking_bit: u32::from(self.masking_bit),
            write_bit: u32::from(self.write_bit),
            clip_mode: self.traversal.map_or(ClipMode::Off, |t| t.mode) as u32,
            render_queue: self.render_queue,
        }
    }
}

impl fmt::Display for MaterialVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (layer {}, queue {})", self.name, self.layer, self.render_queue)
    }
}

/// GPU-side block of the overridden properties.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VariantUniforms {
    /// Clip transform of the portal the layer is seen through.
    pub world_to_portal: [[f32; 4]; 4],
    /// Clip transform of the portal being traversed.
    pub world_to_portal_traversing: [[f32; 4]; 4],
    /// Stencil read mask.
    pub masking_bit: u32,
    /// Stencil write mask.
    pub write_bit: u32,
    /// [`ClipMode`] as integer.
    pub clip_mode: u32,
    /// Render order.
    pub render_queue: i32,
}

impl VariantUniforms {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantum_shared::Vec3;

    #[test]
    fn test_uniform_block_layout() {
        assert_eq!(VariantUniforms::SIZE, 144);
        let uniforms = VariantUniforms::default();
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 144);
    }

    #[test]
    fn test_original_overrides_nothing() {
        let base = BaseMaterial::object(BaseMaterialId::new(3), "Brick", 2000);
        let variant = MaterialVariant::original(&base);
        let uniforms = variant.uniforms();

        assert_eq!(variant.render_queue, 2000);
        assert_eq!(uniforms.masking_bit, 0);
        assert_eq!(uniforms.clip_mode, 0);
        assert_eq!(uniforms.world_to_portal, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn test_transition_uniforms_carry_clip_mode() {
        let base = BaseMaterial::object(BaseMaterialId::new(3), "Brick", 2000);
        let clip = Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0));
        let variant = MaterialVariant {
            traversal: Some(TraversalClip {
                portal: PortalId::from_u128(1),
                world_to_portal: clip,
                mode: ClipMode::KeepFront,
            }),
            ..MaterialVariant::original(&base)
        };

        assert!(variant.is_transition());
        let uniforms = variant.uniforms();
        assert_eq!(uniforms.clip_mode, 2);
        assert_eq!(uniforms.world_to_portal_traversing, clip.to_cols_array_2d());
    }

    #[test]
    fn test_stencil_kinds() {
        assert!(MaterialKind::PortalStencil.writes_stencil());
        assert!(MaterialKind::PortalView.writes_stencil());
        assert!(!MaterialKind::PortalSurface.writes_stencil());
        assert!(!MaterialKind::Object.writes_stencil());
    }
}
