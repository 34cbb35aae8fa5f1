//! # Material Variant Registry
//!
//! Hands out the configured variant of a base material for a layer, and
//! collects variants nobody asked for during the last layer pass.
//!
//! ## Lifecycle
//!
//! ```text
//! begin_pass()          every cached variant -> unused
//! get_or_create(..)     used variant for (base, layer) is reused,
//!                       otherwise a fresh descriptor replaces it
//! end_pass()            unused variants dropped; base materials with
//!                       nothing left are evicted and reset
//! ```
//!
//! Transition variants (entities straddling a portal) live outside that
//! cycle: one per (base, entity, portal, layer), never shared, dropped by
//! [`MaterialVariantRegistry::dispose_transitions`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use quantum_shared::{BaseMaterialId, EntityId, Mat4, PortalId, MAX_LAYERS};

use crate::error::{MaterialError, MaterialResult};
use crate::queues::RenderQueueTable;
use crate::variant::{BaseMaterial, ClipMode, MaterialKind, MaterialVariant, TraversalClip};

/// Supplies the clip transform of the portal each nested layer is seen through.
pub trait ClipSource {
    /// World-to-local transform of the portal leading into `layer`.
    fn portal_clip_matrix(&self, layer: usize) -> Option<Mat4>;
}

impl<F> ClipSource for F
where
    F: Fn(usize) -> Option<Mat4>,
{
    fn portal_clip_matrix(&self, layer: usize) -> Option<Mat4> {
        self(layer)
    }
}

/// Layer (and for stencil/view passes, target layer) a variant is wanted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VariantRequest {
    /// Layer the variant renders on.
    pub layer: usize,
    /// Layer a stencil/view pass writes into.
    pub target_layer: Option<usize>,
}

impl VariantRequest {
    /// Plain request for `layer`.
    #[inline]
    #[must_use]
    pub const fn on_layer(layer: usize) -> Self {
        Self {
            layer,
            target_layer: None,
        }
    }

    /// Sets the layer a stencil/view pass writes into.
    #[inline]
    #[must_use]
    pub const fn targeting(mut self, target_layer: Option<usize>) -> Self {
        self.target_layer = target_layer;
        self
    }
}

/// Portal an entity is traversing, for transition variants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Traversal {
    /// Entity straddling the portal.
    pub entity: EntityId,
    /// Portal being traversed.
    pub portal: PortalId,
    /// World-to-local transform of that portal.
    pub world_to_portal: Mat4,
    /// True if the requested layer is the one the entity's own room sits on.
    pub belongs_to_layer: bool,
}

/// Outcome of a sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Layer variants dropped.
    pub disposed_variants: usize,
    /// Base materials evicted and reset to their original values.
    pub reset_materials: Vec<BaseMaterialId>,
}

/// Running counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Layer variants created.
    pub created: u64,
    /// Requests served from the cache.
    pub reused: u64,
    /// Layer variants dropped by sweeps or replacement.
    pub disposed: u64,
    /// Base materials evicted.
    pub evicted: u64,
    /// Transition variants created.
    pub transitions_created: u64,
    /// Transition variants dropped.
    pub transitions_disposed: u64,
    /// Requests answered with the unmodified original.
    pub fallbacks: u64,
    /// Completed passes.
    pub passes: u64,
}

#[derive(Debug)]
struct Slot {
    variant: Arc<MaterialVariant>,
    used: bool,
}

#[derive(Debug)]
struct TransitionSlot {
    entity: EntityId,
    portal: PortalId,
    variant: Arc<MaterialVariant>,
}

#[derive(Debug)]
struct MaterialCollection {
    original: BaseMaterial,
    layered: BTreeMap<usize, Slot>,
    transitions: Vec<TransitionSlot>,
}

impl MaterialCollection {
    fn new(original: BaseMaterial) -> Self {
        Self {
            original,
            layered: BTreeMap::new(),
            transitions: Vec::new(),
        }
    }
}

/// Cache of per-layer material variants.
#[derive(Debug)]
pub struct MaterialVariantRegistry {
    table: RenderQueueTable,
    max_layers: usize,
    collections: HashMap<BaseMaterialId, MaterialCollection>,
    pass_open: bool,
    stats: RegistryStats,
}

impl MaterialVariantRegistry {
    /// Creates a registry for `max_layers` layers.
    ///
    /// # Errors
    ///
    /// Returns `LayerOutOfRange` for an unsupported budget, or
    /// `InvalidQueueTable` if `table` does not fit it.
    pub fn new(table: RenderQueueTable, max_layers: usize) -> MaterialResult<Self> {
        if max_layers == 0 || max_layers > MAX_LAYERS {
            return Err(MaterialError::LayerOutOfRange {
                layer: max_layers,
                max_layers: MAX_LAYERS,
            });
        }
        table.validate(max_layers)?;

        Ok(Self {
            table,
            max_layers,
            collections: HashMap::new(),
            pass_open: false,
            stats: RegistryStats::default(),
        })
    }

    // =========================================================================
    // Pass bracketing
    // =========================================================================

    /// Marks every cached variant unused. Call before a layer pass notifies
    /// its rooms.
    pub fn begin_pass(&mut self) {
        if self.pass_open {
            tracing::warn!("material pass opened twice without a sweep");
        }
        for collection in self.collections.values_mut() {
            for slot in collection.layered.values_mut() {
                slot.used = false;
            }
        }
        self.pass_open = true;
    }

    /// Drops every variant not requested since [`Self::begin_pass`], and
    /// evicts base materials left with no variant at all.
    pub fn end_pass(&mut self) -> SweepReport {
        let mut report = SweepReport::default();

        for (id, collection) in &mut self.collections {
            let before = collection.layered.len();
            collection.layered.retain(|_, slot| slot.used);
            report.disposed_variants += before - collection.layered.len();

            if collection.layered.is_empty() && collection.transitions.is_empty() {
                report.reset_materials.push(*id);
            }
        }
        for id in &report.reset_materials {
            self.collections.remove(id);
        }
        report.reset_materials.sort_unstable();

        self.stats.disposed += report.disposed_variants as u64;
        self.stats.evicted += report.reset_materials.len() as u64;
        self.stats.passes += 1;
        self.pass_open = false;

        tracing::debug!(
            "material sweep: {} variants disposed, {} materials reset, {} managed",
            report.disposed_variants,
            report.reset_materials.len(),
            self.collections.len()
        );
        report
    }

    // =========================================================================
    // Variant requests
    // =========================================================================

    /// Returns the variant of `base` for `request.layer`, creating it if no
    /// used one exists.
    ///
    /// # Errors
    ///
    /// Returns `LayerOutOfRange` or `MissingClipPortal`. Nothing is cached on
    /// error.
    pub fn get_or_create(
        &mut self,
        base: &BaseMaterial,
        request: VariantRequest,
        clips: &impl ClipSource,
    ) -> MaterialResult<Arc<MaterialVariant>> {
        if let Some(slot) = self
            .collections
            .get(&base.id)
            .and_then(|collection| collection.layered.get(&request.layer))
        {
            if slot.used {
                self.stats.reused += 1;
                return Ok(Arc::clone(&slot.variant));
            }
        }

        let variant = Arc::new(self.build_variant(base, request, clips)?);
        let collection = self
            .collections
            .entry(base.id)
            .or_insert_with(|| MaterialCollection::new(base.clone()));
        let replaced = collection.layered.insert(
            request.layer,
            Slot {
                variant: Arc::clone(&variant),
                used: true,
            },
        );
        if replaced.is_some() {
            self.stats.disposed += 1;
        }
        self.stats.created += 1;

        tracing::trace!("created variant {variant}");
        Ok(variant)
    }

    /// Creates a transition variant of `base` for an entity straddling a
    /// portal. Never cached or shared.
    ///
    /// # Errors
    ///
    /// Returns `LayerOutOfRange` or `MissingClipPortal`.
    pub fn create_transition(
        &mut self,
        base: &BaseMaterial,
        request: VariantRequest,
        traversal: Traversal,
        clips: &impl ClipSource,
    ) -> MaterialResult<Arc<MaterialVariant>> {
        let mut variant = self.build_variant(base, request, clips)?;
        variant.name = format!("{}~{}", variant.name, traversal.portal);
        variant.traversal = Some(TraversalClip {
            portal: traversal.portal,
            world_to_portal: traversal.world_to_portal,
            mode: if traversal.belongs_to_layer {
                ClipMode::KeepBehind
            } else {
                ClipMode::KeepFront
            },
        });
        let variant = Arc::new(variant);

        self.collections
            .entry(base.id)
            .or_insert_with(|| MaterialCollection::new(base.clone()))
            .transitions
            .push(TransitionSlot {
                entity: traversal.entity,
                portal: traversal.portal,
                variant: Arc::clone(&variant),
            });
        self.stats.transitions_created += 1;

        tracing::trace!("created transition variant {variant}");
        Ok(variant)
    }

    /// Drops every transition variant of `entity`. Returns how many.
    pub fn dispose_transitions(&mut self, entity: EntityId) -> usize {
        self.dispose_transitions_where(|slot| slot.entity == entity)
    }

    /// Drops the transition variants of `entity` made for `portal`.
    pub fn dispose_transitions_for(&mut self, entity: EntityId, portal: PortalId) -> usize {
        self.dispose_transitions_where(|slot| slot.entity == entity && slot.portal == portal)
    }

    /// The unmodified original of `base`, used when a variant cannot be made.
    pub fn fallback(&mut self, base: &BaseMaterial) -> Arc<MaterialVariant> {
        self.stats.fallbacks += 1;
        Arc::new(MaterialVariant::original(base))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Layer variants currently cached for `base`.
    #[must_use]
    pub fn variant_count(&self, base: BaseMaterialId) -> usize {
        self.collections.get(&base).map_or(0, |c| c.layered.len())
    }

    /// Transition variants currently alive for `base`.
    #[must_use]
    pub fn transition_count(&self, base: BaseMaterialId) -> usize {
        self.collections.get(&base).map_or(0, |c| c.transitions.len())
    }

    /// Layers `base` currently has variants on, ascending.
    #[must_use]
    pub fn layers_of(&self, base: BaseMaterialId) -> Vec<usize> {
        self.collections
            .get(&base)
            .map(|c| c.layered.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Cached variant of `base` on `layer`, used or not.
    #[must_use]
    pub fn variant(&self, base: BaseMaterialId, layer: usize) -> Option<Arc<MaterialVariant>> {
        self.collections
            .get(&base)
            .and_then(|c| c.layered.get(&layer))
            .map(|slot| Arc::clone(&slot.variant))
    }

    /// Every live instance of `base`: layer variants by layer, then
    /// transition variants in creation order.
    #[must_use]
    pub fn instances(&self, base: BaseMaterialId) -> Vec<Arc<MaterialVariant>> {
        self.collections
            .get(&base)
            .map(|c| {
                c.layered
                    .values()
                    .map(|slot| Arc::clone(&slot.variant))
                    .chain(c.transitions.iter().map(|slot| Arc::clone(&slot.variant)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when `base` has any live instance.
    #[must_use]
    pub fn is_managed(&self, base: BaseMaterialId) -> bool {
        self.collections.contains_key(&base)
    }

    /// Number of base materials with live instances.
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.collections.len()
    }

    /// Original of a managed base material.
    #[must_use]
    pub fn original(&self, base: BaseMaterialId) -> Option<&BaseMaterial> {
        self.collections.get(&base).map(|c| &c.original)
    }

    /// Render order table in use.
    #[must_use]
    pub const fn table(&self) -> &RenderQueueTable {
        &self.table
    }

    /// Layer budget.
    #[must_use]
    pub const fn max_layers(&self) -> usize {
        self.max_layers
    }

    /// Running counters.
    #[must_use]
    pub const fn stats(&self) -> RegistryStats {
        self.stats
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn dispose_transitions_where(&mut self, mut predicate: impl FnMut(&TransitionSlot) -> bool) -> usize {
        let mut disposed = 0;
        for collection in self.collections.values_mut() {
            let before = collection.transitions.len();
            collection.transitions.retain(|slot| !predicate(slot));
            disposed += before - collection.transitions.len();
        }
        self.stats.transitions_disposed += disposed as u64;
        disposed
    }

    fn build_variant(
        &self,
        base: &BaseMaterial,
        request: VariantRequest,
        clips: &impl ClipSource,
    ) -> MaterialResult<MaterialVariant> {
        let layer = request.layer;
        if layer >= self.max_layers {
            return Err(MaterialError::LayerOutOfRange {
                layer,
                max_layers: self.max_layers,
            });
        }

        let mut variant = MaterialVariant::original(base);
        variant.layer = layer;
        variant.name = format!("{}@L{layer}", base.name);

        if layer == 0 {
            if base.kind == MaterialKind::PortalSurface {
                variant.render_queue = self.table.active_layer_portal_surface_queue;
            }
        } else {
            let queues = self.table.layer(layer).ok_or(MaterialError::LayerOutOfRange {
                layer,
                max_layers: self.max_layers,
            })?;
            match base.kind {
                MaterialKind::Object => {
                    variant.render_queue = self.table.global.remap(base.render_queue, queues.objects);
                }
                MaterialKind::PortalSurface => variant.render_queue = queues.portal_surface,
                MaterialKind::PortalStencil | MaterialKind::PortalView => {}
            }
            variant.world_to_portal = Some(
                clips
                    .portal_clip_matrix(layer)
                    .ok_or(MaterialError::MissingClipPortal { layer })?,
            );
            variant.masking_bit = 1u8 << (layer - 1);
        }

        if base.kind.writes_stencil() {
            let last_writing_layer = self.max_layers.saturating_sub(2);
            match request.target_layer {
                Some(target) if layer <= last_writing_layer && target >= 1 && target < self.max_layers => {
                    variant.write_bit = 1u8 << (target - 1);
                    if let Some(queues) = self.table.layer(layer) {
                        variant.render_queue = if base.kind == MaterialKind::PortalStencil {
                            queues.portal_stencil
                        } else {
                            queues.portal_view
                        };
                    }
                    variant.name = format!("{}->L{target}", variant.name);
                }
                _ => variant.write_bit = 0,
            }
        }

        Ok(variant)
    }
}
