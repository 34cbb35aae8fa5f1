//! The 8-bit nested layer field.
//!
//! Layer 0 is the active room and never has a bit. Nested layer `i >= 1` is
//! stored in bit `i - 1`.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::constants::MAX_LAYERS;

/// Set of nested rendering layers a room (or entity) occupies.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerMask(u8);

impl LayerMask {
    /// No nested layer.
    pub const EMPTY: Self = Self(0);

    /// Wraps raw mask bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Mask containing only nested layer `layer`. Layer 0 and out-of-range
    /// layers yield an empty mask.
    #[inline]
    #[must_use]
    pub const fn for_layer(layer: usize) -> Self {
        if layer == 0 || layer >= MAX_LAYERS {
            Self::EMPTY
        } else {
            Self(1u8 << (layer - 1) as u32)
        }
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when no nested layer is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when nested layer `layer` is set. Always false for layer 0.
    #[inline]
    #[must_use]
    pub const fn contains_layer(self, layer: usize) -> bool {
        layer != 0 && layer < MAX_LAYERS && self.0 & (1u8 << (layer - 1) as u32) != 0
    }

    /// Lowest nested layer index present, if any.
    #[inline]
    #[must_use]
    pub const fn lowest_layer(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize + 1)
        }
    }

    /// Number of nested layers set.
    #[inline]
    #[must_use]
    pub const fn layer_count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates the nested layer indices present, lowest first.
    pub fn layers(self) -> impl Iterator<Item = usize> {
        (1..MAX_LAYERS).filter(move |&layer| self.contains_layer(layer))
    }
}

impl BitOr for LayerMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LayerMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for LayerMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerMask({:#010b})", self.0)
    }
}

impl fmt::Display for LayerMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010b}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_zero_has_no_bit() {
        assert!(LayerMask::for_layer(0).is_empty());
        assert!(!LayerMask::from_bits(0xFF).contains_layer(0));
    }

    #[test]
    fn test_layer_to_bit_mapping() {
        assert_eq!(LayerMask::for_layer(1).bits(), 0b1);
        assert_eq!(LayerMask::for_layer(2).bits(), 0b10);
        assert_eq!(LayerMask::for_layer(8).bits(), 0b1000_0000);
        assert!(LayerMask::for_layer(9).is_empty());
    }

    #[test]
    fn test_lowest_layer_and_iteration() {
        let mask = LayerMask::from_bits(0b0110_0100);
        assert_eq!(mask.lowest_layer(), Some(3));
        assert_eq!(mask.layers().collect::<Vec<_>>(), vec![3, 6, 7]);
        assert_eq!(mask.layer_count(), 3);
        assert_eq!(LayerMask::EMPTY.lowest_layer(), None);
    }

    #[test]
    fn test_masks_cast_to_raw_bytes() {
        let masks = [LayerMask::EMPTY, LayerMask::for_layer(1), LayerMask::for_layer(3)];
        let bytes: &[u8] = bytemuck::cast_slice(&masks);
        assert_eq!(bytes, &[0b000, 0b001, 0b100]);
    }

    #[test]
    fn test_union() {
        let mut mask = LayerMask::for_layer(1);
        mask |= LayerMask::for_layer(4);
        assert_eq!(mask, LayerMask::from_bits(0b1001));
        assert_eq!(LayerMask::for_layer(2) | LayerMask::for_layer(3), LayerMask::from_bits(0b110));
    }
}
