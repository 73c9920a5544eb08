use nalgebra::{Matrix3, Matrix4, Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// 3D point type
pub type Point3D = Point3<f64>;

/// 3D vector type
pub type Vector3D = Vector3<f64>;

/// 2D point in the layer frame
pub type Point2D = Point2<f64>;

/// 2D vector in the layer frame
pub type Vector2D = Vector2<f64>;

/// Triangle defined by three vertices and an outward normal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub v0: Point3D,
    pub v1: Point3D,
    pub v2: Point3D,
    pub normal: Vector3D,
}

impl Triangle {
    /// Create a triangle, deriving the normal from the winding.
    pub fn new(v0: Point3D, v1: Point3D, v2: Point3D) -> Self {
        let mut tri = Self {
            v0,
            v1,
            v2,
            normal: Vector3D::z(),
        };
        tri.normal = tri.face_normal();
        tri
    }

    /// Create a triangle with an explicitly supplied normal (as read from a mesh file).
    pub fn with_normal(v0: Point3D, v1: Point3D, v2: Point3D, normal: Vector3D) -> Self {
        Self { v0, v1, v2, normal }
    }

    /// Calculate the normal vector of the triangle from its winding.
    /// Returns a unit normal, or (0, 0, 1) for degenerate triangles
    pub fn face_normal(&self) -> Vector3D {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        let cross = edge1.cross(&edge2);
        let norm = cross.norm();

        if norm < 1e-10 || !norm.is_finite() {
            return Vector3D::z();
        }

        cross / norm
    }

    pub fn vertices(&self) -> [Point3D; 3] {
        [self.v0, self.v1, self.v2]
    }

    /// Get the vertical extent (min_z, max_z)
    pub fn z_bounds(&self) -> (f64, f64) {
        let z_min = self.v0.z.min(self.v1.z).min(self.v2.z);
        let z_max = self.v0.z.max(self.v1.z).max(self.v2.z);
        (z_min, z_max)
    }

    /// Apply a 4x4 affine transform. The normal is carried through the
    /// inverse-transpose of the linear part so non-uniform scales stay correct.
    pub fn transformed(&self, transform: &Matrix4<f64>) -> Triangle {
        let v0 = transform.transform_point(&self.v0);
        let v1 = transform.transform_point(&self.v1);
        let v2 = transform.transform_point(&self.v2);

        let linear: Matrix3<f64> = transform.fixed_view::<3, 3>(0, 0).into_owned();
        let normal = linear
            .try_inverse()
            .map(|inv| inv.transpose() * self.normal)
            .filter(|n| n.norm() > 1e-12)
            .map(|n| n.normalize());

        let mut tri = Triangle::with_normal(v0, v1, v2, Vector3D::z());
        tri.normal = normal.unwrap_or_else(|| tri.face_normal());
        tri
    }
}

/// Plane defined by a point and normal vector
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Plane {
    pub point: Point3D,
    pub normal: Vector3D,
}

impl Plane {
    /// Create a horizontal plane at height z
    pub fn horizontal(z: f64) -> Self {
        Self {
            point: Point3D::new(0.0, 0.0, z),
            normal: Vector3D::z(),
        }
    }

    /// Distance from point to plane (signed)
    pub fn signed_distance(&self, point: &Point3D) -> f64 {
        self.normal.dot(&(point - self.point))
    }
}

/// Line segment in the layer frame, tagged with the triangle that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment2D {
    pub start: Point2D,
    pub end: Point2D,
    /// Index of the source triangle, or `usize::MAX` for generated segments
    pub triangle: usize,
}

impl Segment2D {
    pub fn new(start: Point2D, end: Point2D, triangle: usize) -> Self {
        Self {
            start,
            end,
            triangle,
        }
    }

    /// Segment that did not come from a mesh triangle (infill, synthetic input).
    pub fn free(start: Point2D, end: Point2D) -> Self {
        Self::new(start, end, usize::MAX)
    }

    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.end, self.start, self.triangle)
    }
}

/// Winding direction of a closed polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    /// Counter-clockwise: outer boundary
    Ccw,
    /// Clockwise: hole
    Cw,
}

/// Axis-aligned 2D bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox2D {
    pub min: Point2D,
    pub max: Point2D,
}

impl BoundingBox2D {
    pub fn empty() -> Self {
        Self {
            min: Point2D::new(f64::INFINITY, f64::INFINITY),
            max: Point2D::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point2D>) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.include(p);
        }
        bbox
    }

    pub fn include(&mut self, p: &Point2D) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

/// Ordered sequence of 2D points.
///
/// Closed polygons store every vertex once; the edge from the last point back
/// to the first is implicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Point2D>,
    pub closed: bool,
}

impl Polygon {
    pub fn new(points: Vec<Point2D>, closed: bool) -> Self {
        Self { points, closed }
    }

    pub fn closed(points: Vec<Point2D>) -> Self {
        Self::new(points, true)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Iterate over the edges, including the closing edge for closed polygons.
    pub fn edges(&self) -> impl Iterator<Item = (Point2D, Point2D)> + '_ {
        let n = self.points.len();
        let count = if self.closed && n >= 2 {
            n
        } else {
            n.saturating_sub(1)
        };
        (0..count).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Signed area (shoelace). Positive = counter-clockwise.
    pub fn signed_area(&self) -> f64 {
        signed_area(&self.points)
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn orientation(&self) -> Orientation {
        if self.signed_area() >= 0.0 {
            Orientation::Ccw
        } else {
            Orientation::Cw
        }
    }

    pub fn is_ccw(&self) -> bool {
        self.orientation() == Orientation::Ccw
    }

    pub fn reverse(&mut self) {
        self.points.reverse();
    }

    /// Return the polygon wound in the requested direction.
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        if self.orientation() != orientation {
            self.reverse();
        }
        self
    }

    pub fn bounding_box(&self) -> BoundingBox2D {
        BoundingBox2D::from_points(&self.points)
    }

    /// Total edge length.
    pub fn perimeter(&self) -> f64 {
        self.edges().map(|(a, b)| (b - a).norm()).sum()
    }

    /// Ray-casting point-in-polygon test (boundary points are unspecified).
    pub fn contains_point(&self, point: &Point2D) -> bool {
        let pts = &self.points;
        if pts.len() < 3 {
            return false;
        }

        let mut inside = false;
        let n = pts.len();
        for i in 0..n {
            let j = (i + 1) % n;
            let pi = &pts[i];
            let pj = &pts[j];

            if ((pi.y > point.y) != (pj.y > point.y))
                && (point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x)
            {
                inside = !inside;
            }
        }

        inside
    }

    /// Distance from `point` to the nearest edge.
    pub fn boundary_distance(&self, point: &Point2D) -> f64 {
        self.edges()
            .map(|(a, b)| point_segment_distance(point, &a, &b))
            .fold(f64::INFINITY, f64::min)
    }

    /// Inside test that also accepts points within `tolerance` of the boundary.
    pub fn contains_point_with_tolerance(&self, point: &Point2D, tolerance: f64) -> bool {
        self.contains_point(point) || self.boundary_distance(point) <= tolerance
    }

    /// Rotate the vertex sequence so it starts at the lexicographically
    /// smallest point (x, then y). Gives closed polygons a canonical form.
    pub fn canonicalize(&mut self) {
        if !self.closed || self.points.len() < 2 {
            return;
        }
        let start = self
            .points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| compare_points(a, b))
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.points.rotate_left(start);
    }

    /// Drop vertices that deviate less than `tolerance` from the line through
    /// their neighbours. Never reduces a closed polygon below three vertices.
    pub fn simplify(&mut self, tolerance: f64) {
        if tolerance <= 0.0 || self.points.len() < 4 {
            return;
        }

        let mut changed = true;
        while changed && self.points.len() > 3 {
            changed = false;
            let n = self.points.len();
            let mut i = if self.closed { 0 } else { 1 };
            while i < self.points.len() && self.points.len() > 3 {
                let len = self.points.len();
                if !self.closed && i + 1 >= len {
                    break;
                }
                let prev = self.points[(i + len - 1) % len];
                let next = self.points[(i + 1) % len];
                if point_segment_distance(&self.points[i], &prev, &next) <= tolerance {
                    self.points.remove(i);
                    changed = true;
                } else {
                    i += 1;
                }
            }
            if self.points.len() == n {
                break;
            }
        }
    }

    /// True when any two non-adjacent edges properly cross.
    pub fn has_self_intersection(&self) -> bool {
        first_self_intersection(&self.points).is_some()
    }
}

/// Outer boundary with its holes. The outer ring is CCW, holes are CW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub outer: Polygon,
    pub holes: Vec<Polygon>,
}

impl Region {
    pub fn new(outer: Polygon, holes: Vec<Polygon>) -> Self {
        Self {
            outer: outer.with_orientation(Orientation::Ccw),
            holes: holes
                .into_iter()
                .map(|h| h.with_orientation(Orientation::Cw))
                .collect(),
        }
    }

    /// Net material area (outer minus holes).
    pub fn area(&self) -> f64 {
        self.outer.area() - self.holes.iter().map(Polygon::area).sum::<f64>()
    }

    pub fn contains_point(&self, point: &Point2D) -> bool {
        self.outer.contains_point(point) && !self.holes.iter().any(|h| h.contains_point(point))
    }

    /// Like [`Region::contains_point`], with boundary points within
    /// `tolerance` of any ring counted as inside.
    pub fn contains_point_with_tolerance(&self, point: &Point2D, tolerance: f64) -> bool {
        self.contains_point(point)
            || self.polygons().any(|p| p.boundary_distance(point) <= tolerance)
    }

    /// Outer ring followed by the holes.
    pub fn polygons(&self) -> impl Iterator<Item = &Polygon> {
        std::iter::once(&self.outer).chain(self.holes.iter())
    }

    pub fn bounding_box(&self) -> BoundingBox2D {
        self.outer.bounding_box()
    }

    pub fn canonicalize(&mut self) {
        self.outer.canonicalize();
        for hole in &mut self.holes {
            hole.canonicalize();
        }
        self.holes
            .sort_by(|a, b| compare_points(&min_point(&a.points), &min_point(&b.points)));
    }
}

/// Uniform grid over the edges of a set of rings, for "is any edge closer
/// than r" queries without scanning every edge.
pub struct EdgeGrid {
    cell: f64,
    edges: Vec<(Point2D, Point2D)>,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl EdgeGrid {
    /// Index the edges of `polygons`. Cells are at least `radius` wide so a
    /// query touches at most a 3x3 block.
    pub fn new<'a>(polygons: impl IntoIterator<Item = &'a Polygon>, radius: f64) -> Self {
        let edges: Vec<(Point2D, Point2D)> = polygons.into_iter().flat_map(|p| p.edges()).collect();
        let bbox = BoundingBox2D::from_points(edges.iter().map(|(a, _)| a));
        let extent = bbox.width().max(bbox.height());
        let mut cell = radius.max(extent / (edges.len().max(1) as f64).sqrt());
        if !cell.is_finite() || cell <= 0.0 {
            cell = 1.0;
        }

        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, (a, b)) in edges.iter().enumerate() {
            let (x0, y0) = Self::key(cell, a.x.min(b.x), a.y.min(b.y));
            let (x1, y1) = Self::key(cell, a.x.max(b.x), a.y.max(b.y));
            for x in x0..=x1 {
                for y in y0..=y1 {
                    cells.entry((x, y)).or_default().push(i);
                }
            }
        }

        Self { cell, edges, cells }
    }

    fn key(cell: f64, x: f64, y: f64) -> (i64, i64) {
        ((x / cell).floor() as i64, (y / cell).floor() as i64)
    }

    /// True when some edge lies strictly closer than `radius` to `point`.
    pub fn any_within(&self, point: &Point2D, radius: f64) -> bool {
        let (x0, y0) = Self::key(self.cell, point.x - radius, point.y - radius);
        let (x1, y1) = Self::key(self.cell, point.x + radius, point.y + radius);
        for x in x0..=x1 {
            for y in y0..=y1 {
                let Some(bucket) = self.cells.get(&(x, y)) else {
                    continue;
                };
                if bucket
                    .iter()
                    .any(|&i| point_segment_distance(point, &self.edges[i].0, &self.edges[i].1) < radius)
                {
                    return true;
                }
            }
        }
        false
    }
}

/// Compute the signed area of a closed 2D ring.
/// Positive = counter-clockwise (outer contour), Negative = clockwise (hole).
pub fn signed_area(points: &[Point2D]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y;
        area -= points[j].x * points[i].y;
    }
    area / 2.0
}

/// Lexicographic comparison (x, then y) with a total order on floats.
pub fn compare_points(a: &Point2D, b: &Point2D) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

/// Lexicographically smallest point of a ring.
pub fn min_point(points: &[Point2D]) -> Point2D {
    points
        .iter()
        .copied()
        .min_by(compare_points)
        .unwrap_or_else(Point2D::origin)
}

/// 2D cross product of `a` and `b`.
#[inline]
pub fn cross(a: &Vector2D, b: &Vector2D) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Distance from `p` to the segment `a`-`b`.
pub fn point_segment_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < 1e-24 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Compute intersection of two 2D line segments.
/// Returns Some((t, u)) where t is parameter on segment a1->a2, u on b1->b2.
/// Both t and u in [0,1] means the segments actually intersect.
pub fn segment_intersection(
    a1: &Point2D,
    a2: &Point2D,
    b1: &Point2D,
    b2: &Point2D,
) -> Option<(f64, f64)> {
    let da = a2 - a1;
    let db = b2 - b1;

    let denom = cross(&da, &db);
    if denom.abs() < 1e-12 {
        return None; // Parallel or coincident
    }

    let ab = b1 - a1;
    let t = cross(&ab, &db) / denom;
    let u = cross(&ab, &da) / denom;

    Some((t, u))
}

/// First proper crossing between non-adjacent edges of a closed ring.
/// Returns the two edge indices and the crossing point.
pub fn first_self_intersection(points: &[Point2D]) -> Option<(usize, usize, Point2D)> {
    let n = points.len();
    if n < 4 {
        return None;
    }
    const PARAM_EPS: f64 = 1e-9;

    for i in 0..n {
        let i_next = (i + 1) % n;
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue; // closing edge is adjacent to the first edge
            }
            let j_next = (j + 1) % n;
            if let Some((t, u)) =
                segment_intersection(&points[i], &points[i_next], &points[j], &points[j_next])
            {
                if t > PARAM_EPS && t < 1.0 - PARAM_EPS && u > PARAM_EPS && u < 1.0 - PARAM_EPS {
                    let p = points[i] + (points[i_next] - points[i]) * t;
                    return Some((i, j, p));
                }
            }
        }
    }
    None
}

/// Convex hull (monotone chain), returned as a closed CCW polygon.
pub fn convex_hull(points: &[Point2D]) -> Polygon {
    let mut pts: Vec<Point2D> = points.to_vec();
    pts.sort_by(compare_points);
    pts.dedup_by(|a, b| (*a - *b).norm() < 1e-12);

    if pts.len() < 3 {
        return Polygon::closed(pts);
    }

    let turn = |o: &Point2D, a: &Point2D, b: &Point2D| cross(&(a - o), &(b - o));

    let mut lower: Vec<Point2D> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && turn(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point2D> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && turn(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    Polygon::closed(lower)
}
