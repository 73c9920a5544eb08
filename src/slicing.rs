use crate::contour::assemble_contours;
use crate::contour_offset::{collapse_area, generate_shells, offset_region, ShellSet};
use crate::diagnostics::{AssemblyError, OffsetError, SliceWarning};
use crate::geometry::{Polygon, Region, Triangle};
use crate::infill::{generate_infill, infill_parameters, InfillPattern};
use crate::intersect::{intersect_plane, PlaneSection};
use crate::mesh::{BuildBounds, Mesh};
use crate::settings::SlicingSettings;
use crate::skirt::build_skirt;
use crate::{Error, Result};
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Anything that can be cut by a horizontal plane.
pub trait SliceSource: Send + Sync {
    /// Unordered segments where the plane at `z` cuts the solid.
    fn section(&self, z: f64, epsilon: f64) -> PlaneSection;

    /// Feed every input that affects `section` into the build fingerprint.
    fn fingerprint(&self, state: &mut FxHasher);
}

/// Every solid of a build, with placement transforms already applied.
#[derive(Debug, Clone)]
pub struct MeshSet {
    meshes: Vec<Mesh>,
    triangles: Vec<Triangle>,
}

impl MeshSet {
    pub fn new(meshes: Vec<Mesh>) -> Self {
        let triangles = meshes
            .iter()
            .flat_map(|m| m.transformed_triangles())
            .collect();
        Self { meshes, triangles }
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// Union of the transformed bounds. `None` when the set is empty.
    pub fn bounds(&self) -> Option<BuildBounds> {
        BuildBounds::from_meshes(&self.meshes)
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }
}

impl SliceSource for MeshSet {
    fn section(&self, z: f64, epsilon: f64) -> PlaneSection {
        intersect_plane(&self.triangles, z, epsilon)
    }

    fn fingerprint(&self, state: &mut FxHasher) {
        self.meshes.len().hash(state);
        for mesh in &self.meshes {
            mesh.hash_geometry(state);
        }
    }
}

/// A single layer with its printable geometry
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub index: usize,
    pub z: f64,
    pub thickness: f64,
    /// Outline regions as cut from the solid
    pub contours: Vec<Region>,
    /// One shell set per outline region, same order as `contours`
    pub shells: Vec<ShellSet>,
    pub skirt: Option<Polygon>,
    /// `None` when infill is disabled or the layer failed
    pub infill: Option<InfillPattern>,
    pub warnings: Vec<SliceWarning>,
    pub error: Option<AssemblyError>,
}

impl Layer {
    fn empty(index: usize, z: f64, thickness: f64) -> Self {
        Self {
            index,
            z,
            thickness,
            contours: Vec::new(),
            shells: Vec::new(),
            skirt: None,
            infill: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// False when contour assembly failed; the geometry is then empty.
    pub fn is_ready(&self) -> bool {
        self.error.is_none()
    }

    /// Check if layer has no material
    pub fn is_empty(&self) -> bool {
        self.contours.is_empty()
    }

    /// Regions of the innermost ring of every shell set.
    pub fn innermost_regions(&self) -> impl Iterator<Item = &Region> {
        self.shells
            .iter()
            .filter_map(ShellSet::innermost)
            .flat_map(|ring| ring.regions.iter())
    }
}

/// Per-build status summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub total_layers: usize,
    /// Indices of layers whose contours could not be assembled
    pub failed_layers: Vec<usize>,
    pub warning_count: usize,
}

impl BuildReport {
    fn from_layers(layers: &[Layer]) -> Self {
        Self {
            total_layers: layers.len(),
            failed_layers: layers
                .iter()
                .filter(|l| !l.is_ready())
                .map(|l| l.index)
                .collect(),
            warning_count: layers.iter().map(|l| l.warnings.len()).sum(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_layers.is_empty()
    }
}

/// Ordered, immutable result of one build.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStore {
    layers: Vec<Layer>,
    thickness: f64,
    fingerprint: u64,
    report: BuildReport,
}

impl LayerStore {
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Every layer assembled without a fatal error.
    pub fn is_complete(&self) -> bool {
        self.report.is_complete()
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    /// Layer whose slab `[z - t/2, z + t/2)` contains `z`.
    pub fn layer_at_z(&self, z: f64) -> Option<&Layer> {
        let first = self.layers.first()?;
        let offset = (z - first.z) / self.thickness + 0.5;
        if !offset.is_finite() || offset < 0.0 {
            return None;
        }
        self.layers.get(offset.floor() as usize)
    }

    /// Layer at a fraction `f` of the stack height: index `ceil(f * (count - 1))`.
    pub fn layer_at_fraction(&self, fraction: f64) -> Option<&Layer> {
        if self.layers.is_empty() || !fraction.is_finite() {
            return None;
        }
        let last = (self.layers.len() - 1) as f64;
        let index = (fraction.clamp(0.0, 1.0) * last).ceil() as usize;
        self.layers.get(index)
    }
}

/// Drives plane cutting, contour assembly, shells, skirt and infill for every
/// layer of a build on a dedicated worker pool.
pub struct LayerPipeline {
    settings: SlicingSettings,
    pool: rayon::ThreadPool,
}

impl LayerPipeline {
    /// Validate the settings and set up the worker pool.
    pub fn new(settings: SlicingSettings) -> Result<Self> {
        settings.validate()?;

        let threads = if settings.worker_threads > 0 {
            settings.worker_threads
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("slice-worker-{}", i))
            .build()?;

        Ok(Self { settings, pool })
    }

    pub fn settings(&self) -> &SlicingSettings {
        &self.settings
    }

    /// Layer indices and plane heights: `min.z + t/2 + i*t` for
    /// `ceil((height + t/2) / t)` layers.
    pub fn plan(bounds: &BuildBounds, thickness: f64) -> Vec<(usize, f64)> {
        let height = bounds.height();
        if thickness.is_nan() || thickness <= 0.0 || height.is_nan() || height < 0.0 {
            return Vec::new();
        }
        let count = ((height + thickness / 2.0) / thickness).ceil() as usize;
        (0..count)
            .map(|i| (i, bounds.min.z + thickness / 2.0 + i as f64 * thickness))
            .collect()
    }

    /// Fingerprint of everything that determines the build output.
    pub fn fingerprint<S: SliceSource + ?Sized>(&self, source: &S, bounds: &BuildBounds) -> u64 {
        let mut hasher = FxHasher::default();
        source.fingerprint(&mut hasher);
        self.settings.hash_bits(&mut hasher);
        bounds.hash_bits(&mut hasher);
        hasher.finish()
    }

    /// Build every layer. Always runs to completion.
    pub fn build<S: SliceSource + ?Sized>(&self, source: &S, bounds: &BuildBounds) -> Result<LayerStore> {
        let generation = AtomicU64::new(0);
        self.build_with_cancel(source, bounds, &generation, 0)
    }

    /// Build every layer while `generation` still equals `expected`.
    ///
    /// Layer tasks check the generation before starting; once it moves on,
    /// the remaining tasks are skipped and the build returns
    /// [`Error::Cancelled`]. Tasks already running finish and are discarded.
    pub fn build_with_cancel<S: SliceSource + ?Sized>(
        &self,
        source: &S,
        bounds: &BuildBounds,
        generation: &AtomicU64,
        expected: u64,
    ) -> Result<LayerStore> {
        let thickness = self.settings.layer_thickness;
        let plan = Self::plan(bounds, thickness);
        log::info!(
            "Slicing {} layers (thickness {:.3} mm, {} workers)",
            plan.len(),
            thickness,
            self.pool.current_num_threads()
        );

        let layers: Vec<Option<Layer>> = self.pool.install(|| {
            plan.par_iter()
                .map(|&(index, z)| {
                    if generation.load(Ordering::Acquire) != expected {
                        return None;
                    }
                    Some(self.build_layer(source, index, z))
                })
                .collect()
        });

        if generation.load(Ordering::Acquire) != expected {
            log::info!("Build cancelled (generation {} superseded)", expected);
            return Err(Error::Cancelled);
        }
        let layers: Vec<Layer> = layers.into_iter().collect::<Option<_>>().ok_or(Error::Cancelled)?;

        let report = BuildReport::from_layers(&layers);
        log::info!(
            "Built {} layers: {} failed, {} warnings",
            report.total_layers,
            report.failed_layers.len(),
            report.warning_count
        );

        Ok(LayerStore {
            layers,
            thickness,
            fingerprint: self.fingerprint(source, bounds),
            report,
        })
    }

    /// Build one layer. Depends only on the source, the settings and the
    /// layer's own index and height.
    pub fn build_layer<S: SliceSource + ?Sized>(&self, source: &S, index: usize, z: f64) -> Layer {
        let settings = &self.settings;
        let epsilon = settings.tolerance_epsilon;
        let mut layer = Layer::empty(index, z, settings.layer_thickness);

        let section = source.section(z, epsilon);
        layer
            .warnings
            .extend(section.warnings.into_iter().map(SliceWarning::from));

        let contours = match assemble_contours(&section.segments, settings) {
            Ok(contours) => contours,
            Err(e) => {
                log::warn!("Layer {} (z={:.3}): {}", index, z, e);
                layer.error = Some(e);
                return layer;
            }
        };
        layer
            .warnings
            .extend(contours.warnings.into_iter().map(SliceWarning::from));
        layer.contours = contours.regions;

        for region in &layer.contours {
            let outcome = generate_shells(region, settings);
            layer
                .warnings
                .extend(outcome.warnings.into_iter().map(SliceWarning::from));
            layer.shells.push(outcome.shells);
        }

        if settings.wants_skirt(z) {
            match build_skirt(&layer.contours, settings) {
                Ok(skirt) => layer.skirt = skirt,
                Err(e) => layer.warnings.push(e.into()),
            }
        }

        if !settings.shell_only {
            let mut fill_area = Vec::new();
            for area in self.fill_area(&layer) {
                match area {
                    Ok(regions) => fill_area.extend(regions),
                    Err(e) => layer.warnings.push(e.into()),
                }
            }
            layer.infill = Some(generate_infill(
                &fill_area,
                infill_parameters(index, settings),
                epsilon,
            ));
        }

        log::debug!(
            "Layer {} (z={:.3}): {} regions, {} warnings",
            index,
            z,
            layer.contours.len(),
            layer.warnings.len()
        );
        layer
    }

    /// Innermost ring regions pulled in by half a width, so hatch lines end
    /// where the innermost perimeter's extrusion ends.
    fn fill_area(&self, layer: &Layer) -> Vec<std::result::Result<Vec<Region>, OffsetError>> {
        let settings = &self.settings;
        let min_area = collapse_area(settings);
        layer
            .shells
            .iter()
            .filter_map(|set| set.innermost())
            .map(|ring| -> std::result::Result<Vec<Region>, OffsetError> {
                let mut area = Vec::new();
                for region in &ring.regions {
                    let inset = offset_region(
                        region,
                        settings.extrusion_width / 2.0,
                        settings.offset_policy,
                        min_area,
                    )
                    .ok_or(OffsetError::UnresolvedIntersection { ring: ring.index + 1 })?;
                    area.extend(inset);
                }
                Ok(area)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::AssemblyError;
    use crate::geometry::{Point2D, Point3D, Segment2D};
    use crate::settings::OffsetPolicy;

    fn cube_source() -> (MeshSet, BuildBounds) {
        let mesh = Mesh::cuboid(Point3D::origin(), Point3D::new(20.0, 20.0, 20.0)).unwrap();
        let set = MeshSet::new(vec![mesh]);
        let bounds = set.bounds().unwrap();
        (set, bounds)
    }

    /// 20 mm square outline at every height, except at `broken_z` where one
    /// side is missing.
    struct GappedSquare {
        broken_z: f64,
    }

    impl SliceSource for GappedSquare {
        fn section(&self, z: f64, _epsilon: f64) -> PlaneSection {
            let corners = [
                Point2D::new(0.0, 0.0),
                Point2D::new(20.0, 0.0),
                Point2D::new(20.0, 20.0),
                Point2D::new(0.0, 20.0),
            ];
            let mut section = PlaneSection::new(z);
            for i in 0..4 {
                if i == 3 && (z - self.broken_z).abs() < 1e-9 {
                    continue;
                }
                section
                    .segments
                    .push(Segment2D::new(corners[i], corners[(i + 1) % 4], i));
            }
            section
        }

        fn fingerprint(&self, state: &mut FxHasher) {
            self.broken_z.to_bits().hash(state);
        }
    }

    /// 10 mm square with a hole whose right edge is 1.5 mm from the outline.
    struct HoleNearEdge;

    impl SliceSource for HoleNearEdge {
        fn section(&self, z: f64, _epsilon: f64) -> PlaneSection {
            let mut section = PlaneSection::new(z);
            for (x0, y0, size) in [(0.0, 0.0, 10.0), (5.0, 3.0, 3.5)] {
                let corners = [
                    Point2D::new(x0, y0),
                    Point2D::new(x0 + size, y0),
                    Point2D::new(x0 + size, y0 + size),
                    Point2D::new(x0, y0 + size),
                ];
                for i in 0..4 {
                    section
                        .segments
                        .push(Segment2D::free(corners[i], corners[(i + 1) % 4]));
                }
            }
            section
        }

        fn fingerprint(&self, _state: &mut FxHasher) {}
    }

    #[test]
    fn test_offset_failure_truncates_shells_and_is_recorded() {
        let pipeline = LayerPipeline::new(SlicingSettings {
            shell_count: 3,
            extrusion_width: 1.0,
            offset_policy: OffsetPolicy::Fast,
            ..Default::default()
        })
        .unwrap();

        let layer = pipeline.build_layer(&HoleNearEdge, 0, 0.5);
        assert!(layer.is_ready());
        assert_eq!(layer.contours.len(), 1);
        assert_eq!(layer.contours[0].holes.len(), 1);
        assert_eq!(layer.shells[0].len(), 1, "ring 1 cuts into the hole");
        assert!(layer
            .warnings
            .contains(&SliceWarning::Offset(OffsetError::UnresolvedIntersection { ring: 1 })));
    }

    #[test]
    fn test_plan_layer_count() {
        let (_, bounds) = cube_source();
        let plan = LayerPipeline::plan(&bounds, 0.2);
        assert_eq!(plan.len(), 101);
        assert_eq!(plan[0], (0, 0.1));
        assert!(plan.windows(2).all(|w| w[1].1 > w[0].1));

        let plan = LayerPipeline::plan(&bounds, 4.0);
        let heights: Vec<f64> = plan.iter().map(|&(_, z)| z).collect();
        assert_eq!(heights, vec![2.0, 6.0, 10.0, 14.0, 18.0, 22.0]);
    }

    #[test]
    fn test_invalid_settings_rejected_before_build() {
        let settings = SlicingSettings {
            layer_thickness: -0.1,
            ..Default::default()
        };
        assert!(matches!(LayerPipeline::new(settings), Err(Error::Config(_))));
    }

    #[test]
    fn test_build_cube_layer() {
        let (source, _) = cube_source();
        let pipeline = LayerPipeline::new(SlicingSettings {
            shell_count: 2,
            ..Default::default()
        })
        .unwrap();

        let layer = pipeline.build_layer(&source, 50, 10.0);
        assert!(layer.is_ready());
        assert_eq!(layer.contours.len(), 1);
        assert_eq!(layer.shells.len(), 1);
        assert_eq!(layer.shells[0].len(), 2);
        assert!(layer.skirt.is_none(), "z=10 is above the skirt height");

        let infill = layer.infill.as_ref().unwrap();
        assert!(!infill.is_empty());
        let inner = layer.innermost_regions().next().unwrap();
        for seg in &infill.segments {
            assert!(inner.contains_point_with_tolerance(&seg.start, 1e-6));
            assert!(inner.contains_point_with_tolerance(&seg.end, 1e-6));
        }
    }

    #[test]
    fn test_full_build_and_lookup() {
        let (source, bounds) = cube_source();
        let pipeline = LayerPipeline::new(SlicingSettings {
            layer_thickness: 1.0,
            worker_threads: 2,
            ..Default::default()
        })
        .unwrap();

        let store = pipeline.build(&source, &bounds).unwrap();
        assert_eq!(store.len(), 21);
        assert!(store.is_complete());
        for (i, layer) in store.layers().iter().enumerate() {
            assert_eq!(layer.index, i);
        }

        // Bottom layer gets a skirt, the one above does not
        assert!(store.layer(0).unwrap().skirt.is_some());
        assert!(store.layer(1).unwrap().skirt.is_none());

        // Top plane at 20.5 is above the solid
        assert!(store.layer(20).unwrap().is_empty());

        assert_eq!(store.layer_at_z(10.2).map(|l| l.index), Some(10));
        assert_eq!(store.layer_at_z(-5.0).map(|l| l.index), None);
        assert!(store.layer_at_z(f64::NAN).is_none());
        assert!(store.layer_at_z(f64::INFINITY).is_none());
        assert_eq!(store.layer_at_fraction(0.5).map(|l| l.index), Some(10));
        assert_eq!(store.layer_at_fraction(1.0).map(|l| l.index), Some(20));
    }

    #[test]
    fn test_shell_only_has_no_infill() {
        let (source, _) = cube_source();
        let pipeline = LayerPipeline::new(SlicingSettings {
            shell_only: true,
            shell_count: 3,
            ..Default::default()
        })
        .unwrap();
        let layer = pipeline.build_layer(&source, 0, 5.0);
        assert_eq!(layer.shells[0].len(), 1);
        assert!(layer.infill.is_none());
    }

    #[test]
    fn test_failed_layer_is_isolated() {
        let bounds = BuildBounds::new(Point3D::origin(), Point3D::new(20.0, 20.0, 10.0));
        let pipeline = LayerPipeline::new(SlicingSettings {
            layer_thickness: 2.0,
            ..Default::default()
        })
        .unwrap();
        // Planes at 1, 3, 5, 7, 9, 11
        let source = GappedSquare { broken_z: 5.0 };

        let store = pipeline.build(&source, &bounds).unwrap();
        assert_eq!(store.report().failed_layers, vec![2]);
        assert!(!store.is_complete());

        let failed = store.layer(2).unwrap();
        assert!(matches!(failed.error, Some(AssemblyError::UnclosedGap { .. })));
        assert!(failed.shells.is_empty());
        assert!(failed.infill.is_none());

        for layer in store.layers().iter().filter(|l| l.index != 2) {
            assert!(layer.is_ready());
            assert!(!layer.shells[0].is_empty());
        }
    }

    #[test]
    fn test_superseded_generation_cancels_build() {
        let (source, bounds) = cube_source();
        let pipeline = LayerPipeline::new(SlicingSettings::default()).unwrap();
        let generation = AtomicU64::new(5);
        let result = pipeline.build_with_cancel(&source, &bounds, &generation, 4);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_fingerprint_tracks_settings() {
        let (source, bounds) = cube_source();
        let a = LayerPipeline::new(SlicingSettings::default()).unwrap();
        let b = LayerPipeline::new(SlicingSettings {
            worker_threads: 3,
            ..Default::default()
        })
        .unwrap();
        let c = LayerPipeline::new(SlicingSettings {
            infill_distance: 3.0,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(a.fingerprint(&source, &bounds), b.fingerprint(&source, &bounds));
        assert_ne!(a.fingerprint(&source, &bounds), c.fingerprint(&source, &bounds));
    }
}
