//! Skirt loop around the whole layer.

use crate::contour_offset::{collapse_area, offset_polygon};
use crate::diagnostics::OffsetError;
use crate::geometry::{convex_hull, Point2D, Polygon, Region};
use crate::settings::SlicingSettings;

/// Single closed loop enclosing every region of a layer at a clearance of
/// `skirt_distance` plus one extrusion width.
///
/// Returns `Ok(None)` for an empty layer. The loop is the outward offset of
/// the convex hull of all outer contours, so it is always one simple polygon.
pub fn build_skirt(
    regions: &[Region],
    settings: &SlicingSettings,
) -> Result<Option<Polygon>, OffsetError> {
    let points: Vec<Point2D> = regions
        .iter()
        .flat_map(|r| r.outer.points.iter().copied())
        .collect();
    if points.is_empty() {
        return Ok(None);
    }

    let hull = convex_hull(&points);
    if hull.len() < 3 {
        // Collinear input has no area to grow from
        return Err(OffsetError::Skirt);
    }

    let distance = settings.skirt_distance + settings.extrusion_width;
    let mut loops = offset_polygon(&hull, -distance, collapse_area(settings))
        .ok_or(OffsetError::Skirt)?;
    if loops.len() != 1 {
        return Err(OffsetError::Skirt);
    }

    let mut skirt = loops.remove(0);
    if skirt.has_self_intersection() {
        return Err(OffsetError::Skirt);
    }
    skirt.canonicalize();
    Ok(Some(skirt))
}
