use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Rejected settings snapshot. Raised before any layer work is scheduled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("shell_count must be at least 1")]
    NoShells,

    #[error("max_close_gap ({gap}) is smaller than tolerance_epsilon ({epsilon})")]
    CloseGapBelowTolerance { gap: f64, epsilon: f64 },

    #[error("invalid layer list entry '{entry}': {reason}")]
    LayerList { entry: String, reason: String },
}

/// How shell rings are derived from a contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetPolicy {
    /// Offset each loop on its own and split self-intersections locally.
    Fast,
    /// Resolve all loops of a region together with a polygon overlay.
    Exact,
}

impl Default for OffsetPolicy {
    fn default() -> Self {
        OffsetPolicy::Exact
    }
}

/// Immutable settings snapshot consumed by one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicingSettings {
    /// Layer thickness (mm)
    pub layer_thickness: f64,

    /// Number of perimeter shells
    pub shell_count: usize,

    /// Extrusion line width (mm)
    pub extrusion_width: f64,

    /// Extra full-width rings beyond the last shell
    pub skins_count: usize,

    /// Layers with z at or below this height get a skirt
    pub skirt_height: f64,

    /// Clearance between the object and the skirt (mm)
    pub skirt_distance: f64,

    /// Hatch line spacing (mm)
    pub infill_distance: f64,

    /// Base hatch angle (degrees)
    pub infill_rotation_degrees: f64,

    /// Hatch angle increment per layer (degrees)
    pub infill_rotation_increment_per_layer: f64,

    /// Layer indices that use the alternate spacing and angle
    pub alternate_infill_layers: BTreeSet<usize>,

    pub alternate_infill_distance: f64,

    pub alternate_infill_rotation_degrees: f64,

    /// Only emit the outermost ring; no further shells, skins or infill
    pub shell_only: bool,

    /// Distance under which two points are the same point (mm)
    pub tolerance_epsilon: f64,

    /// Collinear vertex removal tolerance for contours (0 disables)
    pub optimization: f64,

    /// Open chains shorter than this are discarded as noise (mm)
    pub noise_chain_length: f64,

    /// Open chains with a gap up to this are snapped shut (mm)
    pub max_close_gap: f64,

    pub offset_policy: OffsetPolicy,

    /// Worker threads for the layer pool (0 = hardware concurrency)
    pub worker_threads: usize,
}

impl Default for SlicingSettings {
    fn default() -> Self {
        Self {
            layer_thickness: 0.2,
            shell_count: 2,
            extrusion_width: 0.4,
            skins_count: 0,
            skirt_height: 0.5,
            skirt_distance: 3.0,
            infill_distance: 2.0,
            infill_rotation_degrees: 45.0,
            infill_rotation_increment_per_layer: 90.0,
            alternate_infill_layers: BTreeSet::new(),
            alternate_infill_distance: 0.4,
            alternate_infill_rotation_degrees: 45.0,
            shell_only: false,
            tolerance_epsilon: 1e-3,
            optimization: 0.0,
            noise_chain_length: 0.5,
            max_close_gap: 0.25,
            offset_policy: OffsetPolicy::Exact,
            worker_threads: 0,
        }
    }
}

impl SlicingSettings {
    /// Check every numeric field. Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("layer_thickness", self.layer_thickness),
            ("extrusion_width", self.extrusion_width),
            ("skirt_height", self.skirt_height),
            ("skirt_distance", self.skirt_distance),
            ("infill_distance", self.infill_distance),
            ("infill_rotation_degrees", self.infill_rotation_degrees),
            (
                "infill_rotation_increment_per_layer",
                self.infill_rotation_increment_per_layer,
            ),
            ("alternate_infill_distance", self.alternate_infill_distance),
            (
                "alternate_infill_rotation_degrees",
                self.alternate_infill_rotation_degrees,
            ),
            ("tolerance_epsilon", self.tolerance_epsilon),
            ("optimization", self.optimization),
            ("noise_chain_length", self.noise_chain_length),
            ("max_close_gap", self.max_close_gap),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field });
            }
        }

        let positive = [
            ("layer_thickness", self.layer_thickness),
            ("extrusion_width", self.extrusion_width),
            ("infill_distance", self.infill_distance),
            ("alternate_infill_distance", self.alternate_infill_distance),
            ("tolerance_epsilon", self.tolerance_epsilon),
        ];
        for (field, value) in positive {
            if value <= 0.0 {
                return Err(ConfigError::NotPositive { field, value });
            }
        }

        if self.skirt_distance < 0.0 {
            return Err(ConfigError::NotPositive {
                field: "skirt_distance",
                value: self.skirt_distance,
            });
        }

        if self.shell_count == 0 {
            return Err(ConfigError::NoShells);
        }

        if self.max_close_gap < self.tolerance_epsilon {
            return Err(ConfigError::CloseGapBelowTolerance {
                gap: self.max_close_gap,
                epsilon: self.tolerance_epsilon,
            });
        }

        Ok(())
    }

    pub fn is_alternate_layer(&self, layer_index: usize) -> bool {
        self.alternate_infill_layers.contains(&layer_index)
    }

    /// Whether a layer at height `z` gets a skirt.
    pub fn wants_skirt(&self, z: f64) -> bool {
        z <= self.skirt_height
    }

    /// Feed every field into a fingerprint hasher (floats by bit pattern).
    pub fn hash_bits<H: Hasher>(&self, state: &mut H) {
        for value in [
            self.layer_thickness,
            self.extrusion_width,
            self.skirt_height,
            self.skirt_distance,
            self.infill_distance,
            self.infill_rotation_degrees,
            self.infill_rotation_increment_per_layer,
            self.alternate_infill_distance,
            self.alternate_infill_rotation_degrees,
            self.tolerance_epsilon,
            self.optimization,
            self.noise_chain_length,
            self.max_close_gap,
        ] {
            value.to_bits().hash(state);
        }
        self.shell_count.hash(state);
        self.skins_count.hash(state);
        self.alternate_infill_layers.hash(state);
        self.shell_only.hash(state);
        self.offset_policy.hash(state);
        // worker_threads does not change the output
    }
}

/// Parse a list of layer numbers such as `"3, 7 -1"`.
///
/// Entries are separated by commas or whitespace. Negative numbers count back
/// from the top, so `-1` is the last of `layer_count` layers.
pub fn parse_layer_list(text: &str, layer_count: usize) -> Result<BTreeSet<usize>, ConfigError> {
    let mut layers = BTreeSet::new();

    for entry in text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        let value: i64 = entry.parse().map_err(|_| ConfigError::LayerList {
            entry: entry.to_string(),
            reason: "not an integer".to_string(),
        })?;

        let count = layer_count as i64;
        let index = if value < 0 { count + value } else { value };
        if index < 0 || index >= count {
            return Err(ConfigError::LayerList {
                entry: entry.to_string(),
                reason: format!("outside 0..{}", layer_count),
            });
        }
        layers.insert(index as usize);
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert_eq!(SlicingSettings::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_non_positive_thickness() {
        let settings = SlicingSettings {
            layer_thickness: 0.0,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::NotPositive {
                field: "layer_thickness",
                value: 0.0
            })
        );
    }

    #[test]
    fn test_rejects_zero_shells_and_nan() {
        let settings = SlicingSettings {
            shell_count: 0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::NoShells));

        let settings = SlicingSettings {
            infill_distance: f64::NAN,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::NotFinite {
                field: "infill_distance"
            })
        );
    }

    #[test]
    fn test_rejects_negative_alternate_distance() {
        let settings = SlicingSettings {
            alternate_infill_distance: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::NotPositive {
                field: "alternate_infill_distance",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_layer_list() {
        let layers = parse_layer_list("3, 7 -1", 20).unwrap();
        assert_eq!(layers.into_iter().collect::<Vec<_>>(), vec![3, 7, 19]);

        assert!(parse_layer_list("", 5).unwrap().is_empty());
        assert!(parse_layer_list("5", 5).is_err());
        assert!(parse_layer_list("two", 5).is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: SlicingSettings =
            serde_json::from_str(r#"{ "shell_count": 3, "alternate_infill_layers": [3, 7] }"#)
                .unwrap();
        assert_eq!(settings.shell_count, 3);
        assert!(settings.is_alternate_layer(7));
        assert_eq!(settings.layer_thickness, 0.2);
        assert_eq!(settings.offset_policy, OffsetPolicy::Exact);
    }
}
