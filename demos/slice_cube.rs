// Example: slice two cubes and print a per-layer summary

use layer_slicer::*;
use std::sync::Arc;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Layer Slicer - two cube test");
    log::info!("============================\n");

    // Step 1: Build the solids
    log::info!("Step 1: Building meshes");
    let large = Mesh::cuboid(Point3D::origin(), Point3D::new(20.0, 20.0, 20.0))?;
    let mut small = Mesh::cuboid(Point3D::origin(), Point3D::new(8.0, 8.0, 6.0))?;
    small.translate(Vector3D::new(30.0, 5.0, 0.0));
    let source = Arc::new(MeshSet::new(vec![large, small]));
    let bounds = source.bounds().ok_or(MeshError::EmptyMesh)?;
    log::info!("  Triangles: {}", source.num_triangles());
    log::info!("  Height: {:.2} mm\n", bounds.height());

    // Step 2: Configure slicing
    log::info!("Step 2: Configuring slicer");
    let mut settings: SlicingSettings = serde_json::from_str(
        r#"{ "layer_thickness": 0.5, "shell_count": 2, "skins_count": 1, "skirt_height": 1.0 }"#,
    )?;
    let layer_count = LayerPipeline::plan(&bounds, settings.layer_thickness).len();
    settings.alternate_infill_layers = parse_layer_list("0, 1, -1", layer_count)?;
    log::info!("  Layer thickness: {} mm", settings.layer_thickness);
    log::info!("  Alternate infill layers: {:?}\n", settings.alternate_infill_layers);

    // Step 3: Slice in the background and wait for the store
    log::info!("Step 3: Slicing");
    let session = Arc::new(SliceSession::new());
    let handle = session.spawn_rebuild(Arc::clone(&source), settings.clone(), bounds);
    let store = match handle.join() {
        Ok(result) => result?,
        Err(_) => {
            log::error!("Slicing thread panicked");
            return Ok(());
        }
    };

    // Step 4: Summarise
    log::info!("Step 4: Layer summary");
    for layer in store.layers().iter().step_by(8) {
        let rings: usize = layer.shells.iter().map(ShellSet::len).sum();
        let (lines, length) = layer
            .infill
            .as_ref()
            .map_or((0, 0.0), |pattern| (pattern.segments.len(), pattern.total_length()));
        log::info!(
            "  Layer {:3} z={:6.2}: {} regions, {} rings, {} infill lines ({:.1} mm), skirt: {}",
            layer.index,
            layer.z,
            layer.contours.len(),
            rings,
            lines,
            length,
            layer.skirt.is_some()
        );
    }

    // Re-slicing with the same inputs reuses the published store
    let again = session.rebuild(source.as_ref(), &settings, &bounds)?;
    log::info!("\n  Cache reused: {}", Arc::ptr_eq(&store, &again));

    let report = store.report();
    log::info!("✓ Slicing complete!");
    log::info!("  Layers: {}", report.total_layers);
    log::info!("  Failed layers: {:?}", report.failed_layers);
    log::info!("  Warnings: {}", report.warning_count);

    Ok(())
}
