//! Per-layer warnings and errors.
//!
//! Geometry and assembly issues never abort a build: they are collected on the
//! layer that produced them and summarised in the build report.

/// Degenerate input found while cutting the mesh.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryWarning {
    #[error("triangle {triangle} lies in the cutting plane z={z}")]
    CoplanarTriangle { triangle: usize, z: f64 },
}

/// Recoverable problem while stitching segments into loops.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyWarning {
    #[error("discarded open chain of {segments} segments ({length:.4} mm) as noise")]
    NoiseChainDiscarded { segments: usize, length: f64 },

    #[error("force-closed open chain with a {gap:.4} mm gap")]
    ChainForceClosed { gap: f64 },

    #[error("dropped degenerate loop with area {area:.6}")]
    DegenerateLoop { area: f64 },
}

/// Contour gap too large to close; the layer is left empty.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    #[error("contour gap of {gap:.4} mm near ({x:.3}, {y:.3}) cannot be closed")]
    UnclosedGap { gap: f64, x: f64, y: f64 },
}

/// Offset produced geometry that could not be resolved; the ring sequence is
/// truncated at `ring`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OffsetError {
    #[error("ring {ring}: offset loops still intersect after cleanup")]
    UnresolvedIntersection { ring: usize },

    #[error("ring {ring}: offset escaped its parent ring")]
    EscapedParent { ring: usize },

    #[error("skirt offset is self-intersecting")]
    Skirt,
}

/// Any non-fatal diagnostic attached to a layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SliceWarning {
    #[error(transparent)]
    Geometry(#[from] GeometryWarning),

    #[error(transparent)]
    Assembly(#[from] AssemblyWarning),

    #[error(transparent)]
    Offset(#[from] OffsetError),
}
