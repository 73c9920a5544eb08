//! Horizontal plane / triangle mesh intersection.
//!
//! Vertices within `epsilon` of the plane count as "on" the plane. For deciding
//! which edges cross, an "on" vertex behaves like a vertex above the plane, and
//! the crossing point of an edge ending in an "on" vertex is that vertex. An
//! edge lying in the plane is therefore emitted exactly once, by the triangle
//! below it, and fully coplanar triangles emit nothing.

use crate::diagnostics::GeometryWarning;
use crate::geometry::{Plane, Point2D, Point3D, Segment2D, Triangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Below,
    On,
    Above,
}

/// Unordered segments where one plane cuts the mesh.
#[derive(Debug, Clone, Default)]
pub struct PlaneSection {
    pub z: f64,
    pub segments: Vec<Segment2D>,
    pub warnings: Vec<GeometryWarning>,
}

impl PlaneSection {
    pub fn new(z: f64) -> Self {
        Self {
            z,
            segments: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Intersect every triangle with the horizontal plane at `z`.
pub fn intersect_plane(triangles: &[Triangle], z: f64, epsilon: f64) -> PlaneSection {
    let plane = Plane::horizontal(z);
    let mut section = PlaneSection::new(z);

    for (index, tri) in triangles.iter().enumerate() {
        let (z_min, z_max) = tri.z_bounds();
        if z_max < z - epsilon || z_min > z + epsilon {
            continue;
        }

        match intersect_triangle(tri, &plane, epsilon) {
            TriangleCut::Segment(a, b) => section.segments.push(Segment2D::new(a, b, index)),
            TriangleCut::Coplanar => {
                section
                    .warnings
                    .push(GeometryWarning::CoplanarTriangle { triangle: index, z });
            }
            TriangleCut::None => {}
        }
    }

    section
}

enum TriangleCut {
    None,
    Coplanar,
    Segment(Point2D, Point2D),
}

fn intersect_triangle(tri: &Triangle, plane: &Plane, epsilon: f64) -> TriangleCut {
    let vertices = tri.vertices();
    let distances = vertices.map(|v| plane.signed_distance(&v));
    let sides = distances.map(|d| {
        if d.abs() <= epsilon {
            Side::On
        } else if d > 0.0 {
            Side::Above
        } else {
            Side::Below
        }
    });

    if sides.iter().all(|&s| s == Side::On) {
        return TriangleCut::Coplanar;
    }

    let below = sides.iter().filter(|&&s| s == Side::Below).count();
    if below == 0 || below == 3 {
        return TriangleCut::None;
    }

    let mut points: Vec<Point2D> = Vec::with_capacity(2);
    for (i, j) in [(0, 1), (1, 2), (2, 0)] {
        let i_below = sides[i] == Side::Below;
        let j_below = sides[j] == Side::Below;
        if i_below == j_below {
            continue;
        }

        let point = if sides[i] == Side::On {
            vertices[i]
        } else if sides[j] == Side::On {
            vertices[j]
        } else {
            interpolate_edge(&vertices[i], &vertices[j], distances[i], distances[j])
        };
        points.push(Point2D::new(point.x, point.y));
    }

    if points.len() != 2 {
        return TriangleCut::None;
    }

    if (points[1] - points[0]).norm() < epsilon {
        // Plane passes through a single vertex
        return TriangleCut::None;
    }

    TriangleCut::Segment(points[0], points[1])
}

/// Linear interpolation along the edge to the point at signed distance zero.
fn interpolate_edge(p1: &Point3D, p2: &Point3D, d1: f64, d2: f64) -> Point3D {
    let t = d1 / (d1 - d2);
    p1 + (p2 - p1) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;

    #[test]
    fn test_triangle_plane_intersection() {
        let tri = Triangle::new(
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(1.0, 0.0, 0.0),
            Point3D::new(0.0, 1.0, 1.0),
        );

        let section = intersect_plane(&[tri], 0.5, 1e-6);
        assert_eq!(section.segments.len(), 1);
        let seg = section.segments[0];
        assert_eq!(seg.triangle, 0);
        // Both crossing points sit at y = 0.5
        assert!((seg.start.y - 0.5).abs() < 1e-10);
        assert!((seg.end.y - 0.5).abs() < 1e-10);
        assert!((seg.length() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_triangle_outside_plane_is_skipped() {
        let tri = Triangle::new(
            Point3D::new(0.0, 0.0, 1.0),
            Point3D::new(1.0, 0.0, 1.0),
            Point3D::new(0.0, 1.0, 2.0),
        );
        let section = intersect_plane(&[tri], 0.5, 1e-6);
        assert!(section.segments.is_empty());
        assert!(section.warnings.is_empty());
    }

    #[test]
    fn test_coplanar_triangle_reports_warning() {
        let tri = Triangle::new(
            Point3D::new(0.0, 0.0, 2.0),
            Point3D::new(1.0, 0.0, 2.0),
            Point3D::new(0.0, 1.0, 2.0),
        );
        let section = intersect_plane(&[tri], 2.0, 1e-6);
        assert!(section.segments.is_empty());
        assert_eq!(
            section.warnings,
            vec![GeometryWarning::CoplanarTriangle { triangle: 0, z: 2.0 }]
        );
    }

    #[test]
    fn test_vertex_touching_plane_gives_no_segment() {
        // Apex touches the plane from below
        let tri = Triangle::new(
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(1.0, 0.0, 0.0),
            Point3D::new(0.0, 1.0, 1.0),
        );
        let section = intersect_plane(&[tri], 1.0, 1e-6);
        assert!(section.segments.is_empty());
    }

    #[test]
    fn test_in_plane_edge_emitted_once() {
        // Two triangles sharing the edge (0,0,1)-(1,0,1), one below, one above
        let lower = Triangle::new(
            Point3D::new(0.0, 0.0, 1.0),
            Point3D::new(1.0, 0.0, 1.0),
            Point3D::new(0.5, 0.0, 0.0),
        );
        let upper = Triangle::new(
            Point3D::new(1.0, 0.0, 1.0),
            Point3D::new(0.0, 0.0, 1.0),
            Point3D::new(0.5, 0.0, 2.0),
        );
        let section = intersect_plane(&[lower, upper], 1.0, 1e-6);
        assert_eq!(section.segments.len(), 1);
        assert_eq!(section.segments[0].triangle, 0);
    }

    #[test]
    fn test_cube_section_has_eight_segments() {
        let mesh = Mesh::cuboid(Point3D::origin(), Point3D::new(20.0, 20.0, 20.0)).unwrap();
        let section = intersect_plane(&mesh.triangles, 10.0, 1e-6);
        // Two triangles per side face
        assert_eq!(section.segments.len(), 8);
        for seg in &section.segments {
            for p in [seg.start, seg.end] {
                assert!(p.x >= -1e-9 && p.x <= 20.0 + 1e-9);
                assert!(p.y >= -1e-9 && p.y <= 20.0 + 1e-9);
            }
        }
    }
}
