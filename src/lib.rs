// Core modules for mesh-to-layer slicing
pub mod geometry;
pub mod mesh;
pub mod settings;
pub mod diagnostics;
pub mod intersect;
pub mod contour;
pub mod contour_offset;
pub mod skirt;
pub mod infill;
pub mod slicing;
pub mod session;

// Re-export commonly used types
pub use geometry::{Point2D, Point3D, Polygon, Region, Segment2D, Triangle, Vector3D};
pub use mesh::{BuildBounds, Mesh, MeshError};
pub use settings::{parse_layer_list, ConfigError, OffsetPolicy, SlicingSettings};
pub use diagnostics::{AssemblyError, AssemblyWarning, GeometryWarning, OffsetError, SliceWarning};
pub use contour_offset::{RingKind, ShellRing, ShellSet};
pub use infill::InfillPattern;
pub use slicing::{BuildReport, Layer, LayerPipeline, LayerStore, MeshSet, SliceSource};
pub use session::SliceSession;

/// Main result type for the slicer
pub type Result<T> = std::result::Result<T, Error>;

/// Build-level errors. Per-layer problems are recorded on the layer instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid settings: {0}")]
    Config(#[from] ConfigError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Build was superseded by a newer one")]
    Cancelled,
}
