//! # Startup Settings
//!
//! Loaded once per level from TOML. Every field has a default, so an empty
//! document yields the stock 9-layer setup. Omitted `collision_layers` and
//! `render_queues` are sized for the document's own `max_layers`.
//!
//! ```toml
//! max_layers = 4
//! collision_layers = [24, 25, 26]
//! log_level = "warning"
//! ```

use std::path::Path;

use quantum_materials::{MaterialError, RenderQueueTable};
use quantum_shared::MAX_LAYERS;
use quantum_portals::{TrackerConfig, DEFAULT_NEAR_CLIP, DEFAULT_TRIGGER_DEPTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettingsError {
    /// Document could not be read.
    #[error("Settings I/O failed: {0}")]
    Io(String),

    /// Document is not valid settings TOML.
    #[error("Settings parse failed: {0}")]
    Parse(String),

    /// Layer count outside `1..=9`.
    #[error("max_layers must be in 1..={max}, got {requested}")]
    InvalidMaxLayers {
        /// Requested count.
        requested: usize,
        /// Hard limit.
        max: usize,
    },

    /// One collision layer is needed per nested layer.
    #[error("Expected {expected} collision layers, got {actual}")]
    CollisionLayerCount {
        /// `max_layers - 1`.
        expected: usize,
        /// Configured count.
        actual: usize,
    },

    /// Distances must be positive and finite.
    #[error("{name} must be positive, got {value}")]
    InvalidDistance {
        /// Offending field.
        name: &'static str,
        /// Configured value.
        value: f32,
    },

    /// Render queue table does not fit the layer count.
    #[error("Render queue table rejected: {0}")]
    RenderQueues(#[from] MaterialError),
}

/// Result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Log verbosity requested for the host's subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-variant traces.
    Verbose,
    /// Informational and above.
    #[default]
    Info,
    /// Warnings and errors.
    Warning,
    /// Errors only.
    Error,
    /// Errors only; kept for older settings files.
    Fatal,
}

impl LogLevel {
    /// Matching `tracing` level.
    #[must_use]
    pub const fn as_tracing_level(self) -> tracing::Level {
        match self {
            Self::Verbose => tracing::Level::TRACE,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Fatal => tracing::Level::ERROR,
        }
    }
}

/// Startup configuration of a compressed space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "SettingsDocument")]
pub struct QuantumSettings {
    /// Layer budget, active room included.
    pub max_layers: usize,
    /// Collision layer per nested layer (`max_layers - 1` entries).
    pub collision_layers: Vec<u32>,
    /// Depth of portal trigger volumes.
    pub portal_trigger_depth: f32,
    /// Near clip distance of the viewpoint camera.
    pub near_clip_plane: f32,
    /// Render order of the depth clear quad drawn during a viewpoint transition.
    pub depth_clear_queue: i32,
    /// Requested log verbosity.
    pub log_level: LogLevel,
    /// Capacity of the outward event channel.
    pub event_capacity: usize,
    /// Per-layer render orders.
    pub render_queues: RenderQueueTable,
}

/// Settings as written in TOML, before layer-sized defaults are filled in.
#[derive(Deserialize)]
struct SettingsDocument {
    max_layers: Option<usize>,
    collision_layers: Option<Vec<u32>>,
    portal_trigger_depth: Option<f32>,
    near_clip_plane: Option<f32>,
    depth_clear_queue: Option<i32>,
    log_level: Option<LogLevel>,
    event_capacity: Option<usize>,
    render_queues: Option<RenderQueueTable>,
}

impl From<SettingsDocument> for QuantumSettings {
    fn from(doc: SettingsDocument) -> Self {
        let max_layers = doc.max_layers.unwrap_or(MAX_LAYERS);
        // Out-of-range counts keep their value so `validate` can report them.
        let stock = Self::with_layers(max_layers.clamp(1, MAX_LAYERS));
        Self {
            max_layers,
            collision_layers: doc.collision_layers.unwrap_or(stock.collision_layers),
            portal_trigger_depth: doc.portal_trigger_depth.unwrap_or(stock.portal_trigger_depth),
            near_clip_plane: doc.near_clip_plane.unwrap_or(stock.near_clip_plane),
            depth_clear_queue: doc.depth_clear_queue.unwrap_or(stock.depth_clear_queue),
            log_level: doc.log_level.unwrap_or(stock.log_level),
            event_capacity: doc.event_capacity.unwrap_or(stock.event_capacity),
            render_queues: doc.render_queues.unwrap_or(stock.render_queues),
        }
    }
}

impl Default for QuantumSettings {
    fn default() -> Self {
        Self::with_layers(MAX_LAYERS)
    }
}

impl QuantumSettings {
    /// Stock settings for `max_layers` layers.
    #[must_use]
    pub fn with_layers(max_layers: usize) -> Self {
        Self {
            max_layers,
            collision_layers: (0..max_layers.saturating_sub(1))
                .map(|i| 24 + u32::try_from(i).unwrap_or_default())
                .collect(),
            portal_trigger_depth: DEFAULT_TRIGGER_DEPTH,
            near_clip_plane: DEFAULT_NEAR_CLIP,
            depth_clear_queue: 1998,
            log_level: LogLevel::default(),
            event_capacity: 1024,
            render_queues: RenderQueueTable::default_for(max_layers),
        }
    }

    /// Parses and validates settings.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed TOML, or any validation error.
    pub fn from_toml_str(text: &str) -> SettingsResult<Self> {
        let settings: Self = toml::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses and validates a settings file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as
    /// [`QuantumSettings::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> SettingsResult<()> {
        if self.max_layers == 0 || self.max_layers > MAX_LAYERS {
            return Err(SettingsError::InvalidMaxLayers {
                requested: self.max_layers,
                max: MAX_LAYERS,
            });
        }
        let expected = self.max_layers - 1;
        if self.collision_layers.len() != expected {
            return Err(SettingsError::CollisionLayerCount {
                expected,
                actual: self.collision_layers.len(),
            });
        }
        for (name, value) in [
            ("portal_trigger_depth", self.portal_trigger_depth),
            ("near_clip_plane", self.near_clip_plane),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SettingsError::InvalidDistance { name, value });
            }
        }
        self.render_queues.validate(self.max_layers)?;
        Ok(())
    }

    /// Collision layer for nested layer `layer` (1-based).
    #[must_use]
    pub fn collision_layer_for(&self, layer: usize) -> Option<u32> {
        layer.checked_sub(1).and_then(|i| self.collision_layers.get(i)).copied()
    }

    /// Tracker tuning derived from the camera and trigger settings.
    #[must_use]
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig::from_near_clip(self.near_clip_plane, self.portal_trigger_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = QuantumSettings::default();
        assert_eq!(settings.max_layers, 9);
        assert_eq!(settings.collision_layers.len(), 8);
        settings.validate().unwrap();
    }

    #[test]
    fn test_empty_document_gives_defaults() {
        let settings = QuantumSettings::from_toml_str("").unwrap();
        assert_eq!(settings, QuantumSettings::default());
    }

    #[test]
    fn test_log_level_mapping() {
        let settings = QuantumSettings::from_toml_str("log_level = \"warning\"").unwrap();
        assert_eq!(settings.log_level, LogLevel::Warning);
        assert_eq!(settings.log_level.as_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Verbose.as_tracing_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_partial_document_sizes_defaults_to_layer_count() {
        let settings = QuantumSettings::from_toml_str("max_layers = 4\ncollision_layers = [24, 25, 26]\n").unwrap();
        assert_eq!(settings.max_layers, 4);
        assert_eq!(settings.render_queues, RenderQueueTable::default_for(4));

        let settings = QuantumSettings::from_toml_str("max_layers = 3").unwrap();
        assert_eq!(settings, QuantumSettings::with_layers(3));
    }

    #[test]
    fn test_layer_count_must_match_tables() {
        let mut settings = QuantumSettings::with_layers(4);
        settings.render_queues = RenderQueueTable::default_for(9);
        assert!(matches!(settings.validate(), Err(SettingsError::RenderQueues(_))));

        let err = QuantumSettings::from_toml_str("collision_layers = [1, 2]").unwrap_err();
        assert_eq!(err, SettingsError::CollisionLayerCount { expected: 8, actual: 2 });

        let err = QuantumSettings::from_toml_str("max_layers = 12").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidMaxLayers { requested: 12, .. }));
    }

    #[test]
    fn test_with_layers_round_trips_through_toml() {
        let settings = QuantumSettings::with_layers(4);
        settings.validate().unwrap();
        let text = toml::to_string(&settings).unwrap();
        assert_eq!(QuantumSettings::from_toml_str(&text).unwrap(), settings);
    }

    #[test]
    fn test_collision_layer_lookup() {
        let settings = QuantumSettings::with_layers(3);
        assert_eq!(settings.collision_layers, vec![24, 25]);
        assert_eq!(settings.collision_layer_for(0), None);
        assert_eq!(settings.collision_layer_for(1), Some(24));
        assert_eq!(settings.collision_layer_for(2), Some(25));
        assert_eq!(settings.collision_layer_for(3), None);
    }

    #[test]
    fn test_negative_distance_rejected() {
        let err = QuantumSettings::from_toml_str("near_clip_plane = -1.0").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidDistance { name: "near_clip_plane", .. }));
    }
}
