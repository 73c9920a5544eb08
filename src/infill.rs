// Rectilinear hatch infill for the area inside the innermost shell ring

use crate::geometry::{Point2D, Region, Segment2D};
use crate::settings::SlicingSettings;
use serde::{Deserialize, Serialize};

/// Hatch spacing and direction for one layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InfillParameters {
    pub angle_degrees: f64,
    pub spacing: f64,
}

/// Hatch lines clipped to a layer's fill area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfillPattern {
    pub angle_degrees: f64,
    pub spacing: f64,
    pub segments: Vec<Segment2D>,
}

impl InfillPattern {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total extruded length (mm)
    pub fn total_length(&self) -> f64 {
        self.segments.iter().map(Segment2D::length).sum()
    }
}

/// Layers listed as alternate use the alternate spacing and rotation instead
/// of the regular ones. Every other layer rotates by the per-layer increment.
pub fn infill_parameters(layer_index: usize, settings: &SlicingSettings) -> InfillParameters {
    if settings.is_alternate_layer(layer_index) {
        return InfillParameters {
            angle_degrees: settings.alternate_infill_rotation_degrees.rem_euclid(360.0),
            spacing: settings.alternate_infill_distance,
        };
    }

    let angle = settings.infill_rotation_degrees
        + layer_index as f64 * settings.infill_rotation_increment_per_layer;
    InfillParameters {
        angle_degrees: angle.rem_euclid(360.0),
        spacing: settings.infill_distance,
    }
}

/// Hatch the fill area of one layer.
///
/// Hatch lines sit on a fixed grid (multiples of the spacing, measured
/// across the hatch direction from the origin), so layers with the same
/// parameters line up. Crossings are paired even-odd over all outer and hole
/// rings, and consecutive lines alternate direction.
pub fn generate_infill(
    fill_area: &[Region],
    parameters: InfillParameters,
    epsilon: f64,
) -> InfillPattern {
    let mut pattern = InfillPattern {
        angle_degrees: parameters.angle_degrees,
        spacing: parameters.spacing,
        segments: Vec::new(),
    };
    if fill_area.is_empty() || parameters.spacing <= 0.0 {
        return pattern;
    }

    let (sin, cos) = parameters.angle_degrees.to_radians().sin_cos();
    let to_hatch = |p: &Point2D| Point2D::new(p.x * cos + p.y * sin, -p.x * sin + p.y * cos);
    let from_hatch = |x: f64, y: f64| Point2D::new(x * cos - y * sin, x * sin + y * cos);

    // Rings in the hatch frame, where hatch lines are horizontal
    let rings: Vec<Vec<Point2D>> = fill_area
        .iter()
        .flat_map(Region::polygons)
        .filter(|p| p.len() >= 3)
        .map(|p| p.points.iter().map(to_hatch).collect())
        .collect();
    if rings.is_empty() {
        return pattern;
    }

    let (min_y, max_y) = rings
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.y), hi.max(p.y))
        });

    let first = (min_y / parameters.spacing).ceil() as i64;
    let last = (max_y / parameters.spacing).floor() as i64;
    let mut crossings: Vec<f64> = Vec::new();

    for k in first..=last {
        let y = k as f64 * parameters.spacing;

        crossings.clear();
        for ring in &rings {
            let n = ring.len();
            for i in 0..n {
                let a = &ring[i];
                let b = &ring[(i + 1) % n];
                // Half-open so a vertex on the line is counted once
                if (a.y <= y && b.y > y) || (b.y <= y && a.y > y) {
                    let t = (y - a.y) / (b.y - a.y);
                    crossings.push(a.x + t * (b.x - a.x));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        let forward = k.rem_euclid(2) == 0;
        let mut line: Vec<Segment2D> = crossings
            .chunks_exact(2)
            .filter(|pair| pair[1] - pair[0] >= epsilon)
            .map(|pair| Segment2D::free(from_hatch(pair[0], y), from_hatch(pair[1], y)))
            .collect();
        if !forward {
            line.reverse();
            for seg in &mut line {
                *seg = seg.reversed();
            }
        }
        pattern.segments.extend(line);
    }

    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon {
        Polygon::closed(vec![
            Point2D::new(x0, y0),
            Point2D::new(x0 + size, y0),
            Point2D::new(x0 + size, y0 + size),
            Point2D::new(x0, y0 + size),
        ])
    }

    fn params(angle: f64, spacing: f64) -> InfillParameters {
        InfillParameters {
            angle_degrees: angle,
            spacing,
        }
    }

    #[test]
    fn test_horizontal_hatch_of_square() {
        let area = [Region::new(square(1.0, 1.0, 18.0), Vec::new())];
        let pattern = generate_infill(&area, params(0.0, 2.0), 1e-3);

        // y = 2, 4, ..., 18
        assert_eq!(pattern.segments.len(), 9);
        for (i, seg) in pattern.segments.iter().enumerate() {
            assert!((seg.start.y - 2.0 * (i + 1) as f64).abs() < 1e-9);
            assert!((seg.length() - 18.0).abs() < 1e-9);
        }
        // zigzag: neighbouring lines run in opposite directions
        let d0 = pattern.segments[0].end.x - pattern.segments[0].start.x;
        let d1 = pattern.segments[1].end.x - pattern.segments[1].start.x;
        assert!(d0 * d1 < 0.0);
    }

    #[test]
    fn test_vertical_hatch_of_square() {
        let area = [Region::new(square(1.0, 1.0, 18.0), Vec::new())];
        let pattern = generate_infill(&area, params(90.0, 2.0), 1e-3);

        assert_eq!(pattern.segments.len(), 9);
        for seg in &pattern.segments {
            assert!((seg.start.x - seg.end.x).abs() < 1e-9);
            assert!((seg.length() - 18.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_hatch_skips_hole() {
        let area = [Region::new(
            square(1.0, 1.0, 18.0),
            vec![square(7.0, 7.0, 6.0)],
        )];
        let pattern = generate_infill(&area, params(0.0, 2.0), 1e-3);

        // y = 8, 10, 12 cross the hole and split in two
        assert_eq!(pattern.segments.len(), 12);
        for seg in &pattern.segments {
            let mid = Point2D::new(
                (seg.start.x + seg.end.x) / 2.0,
                (seg.start.y + seg.end.y) / 2.0,
            );
            assert!(area[0].contains_point(&mid));
        }
    }

    #[test]
    fn test_diagonal_hatch_stays_inside() {
        let area = [Region::new(square(0.3, 0.7, 15.0), Vec::new())];
        let pattern = generate_infill(&area, params(45.0, 1.5), 1e-3);
        assert!(!pattern.is_empty());
        for seg in &pattern.segments {
            for p in [seg.start, seg.end] {
                assert!(area[0].contains_point_with_tolerance(&p, 1e-6));
            }
        }
        // neighbouring parallel lines are one spacing apart
        let a = &pattern.segments[0];
        let b = &pattern.segments[1];
        let dir = (a.end - a.start).normalize();
        let offset = b.start - a.start;
        let across = (offset.x * dir.y - offset.y * dir.x).abs();
        assert!((across - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_area_gives_empty_pattern() {
        let pattern = generate_infill(&[], params(0.0, 2.0), 1e-3);
        assert!(pattern.is_empty());
        assert_eq!(pattern.spacing, 2.0);
    }

    #[test]
    fn test_rotation_increments_per_layer() {
        let settings = SlicingSettings {
            infill_rotation_degrees: 45.0,
            infill_rotation_increment_per_layer: 90.0,
            ..Default::default()
        };
        let angles: Vec<f64> = (0..5)
            .map(|i| infill_parameters(i, &settings).angle_degrees)
            .collect();
        assert_eq!(angles, vec![45.0, 135.0, 225.0, 315.0, 45.0]);
    }

    #[test]
    fn test_alternate_layers_substitute_parameters() {
        let settings = SlicingSettings {
            infill_distance: 2.0,
            infill_rotation_degrees: 0.0,
            infill_rotation_increment_per_layer: 90.0,
            alternate_infill_layers: [3, 7].into_iter().collect(),
            alternate_infill_distance: 0.4,
            alternate_infill_rotation_degrees: 45.0,
            ..Default::default()
        };

        let regular = infill_parameters(2, &settings);
        assert_eq!(regular, params(180.0, 2.0));

        for layer in [3, 7] {
            assert_eq!(infill_parameters(layer, &settings), params(45.0, 0.4));
        }
    }
}
