//! 2D polygon offsetting and shell (perimeter) ring generation.
//!
//! Algorithm: edge-normal offset with self-intersection splitting.
//! Every edge of a ring is moved to its left by the offset distance (for a
//! CCW outer ring that is inward, for a CW hole it is into the material) and
//! adjacent offset edges are joined at their intersection. Corners that turn
//! away from the offset side are mitered up to [`MITER_LIMIT`] and beveled
//! beyond it. Where the offset ring crosses itself it is split into separate
//! loops; loops whose winding flipped are collapsed material and are dropped.

use crate::diagnostics::OffsetError;
use crate::geometry::{
    compare_points, cross, first_self_intersection, min_point, segment_intersection, signed_area,
    EdgeGrid, Point2D, Polygon, Region, Vector2D,
};
use crate::settings::{OffsetPolicy, SlicingSettings};
use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::single::SingleFloatOverlay;
use serde::{Deserialize, Serialize};

/// Maximum miter length as a multiple of the offset distance.
pub const MITER_LIMIT: f64 = 2.0;

/// Raw offset of a closed ring toward the left of its edges by `delta`
/// (negative `delta` offsets to the right). The result may self-intersect.
pub fn offset_ring_raw(points: &[Point2D], delta: f64) -> Vec<Point2D> {
    let mut pts: Vec<Point2D> = Vec::with_capacity(points.len());
    for p in points {
        if pts.last().map_or(true, |last: &Point2D| (p - last).norm() > 1e-12) {
            pts.push(*p);
        }
    }
    while pts.len() > 1 && (pts[0] - pts[pts.len() - 1]).norm() <= 1e-12 {
        pts.pop();
    }

    // A vertex on a straight run would offset to a point behind the miter of
    // a nearby corner and fold the ring back on itself.
    let mut i = 0;
    while pts.len() > 3 && i < pts.len() {
        let n = pts.len();
        let u = (pts[i] - pts[(i + n - 1) % n]).normalize();
        let v = (pts[(i + 1) % n] - pts[i]).normalize();
        if cross(&u, &v).abs() < 1e-9 && u.dot(&v) > 0.0 {
            pts.remove(i);
        } else {
            i += 1;
        }
    }

    let n = pts.len();
    if n < 3 {
        return Vec::new();
    }

    let dirs: Vec<Vector2D> = (0..n)
        .map(|i| {
            let d = pts[(i + 1) % n] - pts[i];
            d / d.norm()
        })
        .collect();
    let left = |d: &Vector2D| Vector2D::new(-d.y, d.x);

    let mut out = Vec::with_capacity(n + n / 2);
    for i in 0..n {
        let prev = &dirs[(i + n - 1) % n];
        let next = &dirs[i];
        let p = pts[i];
        let a = p + left(prev) * delta;
        let b = p + left(next) * delta;

        let turn = cross(prev, next);
        if turn.abs() < 1e-9 {
            if prev.dot(next) > 0.0 {
                out.push(b); // straight through
            } else {
                out.push(a); // full reversal: spike
                out.push(b);
            }
            continue;
        }

        let miter = line_point_intersection(&a, prev, &b, next).unwrap_or(b);
        if turn * delta > 0.0 {
            // Corner bends toward the offset side: the offset edges cross
            out.push(miter);
        } else if (miter - p).norm() <= MITER_LIMIT * delta.abs() {
            out.push(miter);
        } else {
            // Square the corner off at one offset distance from the vertex
            let phi = prev.dot(next).clamp(-1.0, 1.0).acos();
            let reach = delta.abs() * (phi / 4.0).tan();
            out.push(a + prev * reach);
            out.push(b - next * reach);
        }
    }

    out
}

/// Intersection of the lines `p + t*u` and `q + s*v`.
fn line_point_intersection(p: &Point2D, u: &Vector2D, q: &Point2D, v: &Vector2D) -> Option<Point2D> {
    let denom = cross(u, v);
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = cross(&(q - p), v) / denom;
    Some(p + u * t)
}

/// Split a ring at every proper self-crossing into simple loops.
/// Returns `None` when the ring keeps producing crossings past a sane bound.
pub fn split_self_intersections(points: Vec<Point2D>) -> Option<Vec<Vec<Point2D>>> {
    let max_splits = 4 * points.len() + 16;
    let mut splits = 0usize;
    let mut pending = vec![points];
    let mut done = Vec::new();

    while let Some(ring) = pending.pop() {
        let Some((i, j, x)) = first_self_intersection(&ring) else {
            if ring.len() >= 3 {
                done.push(ring);
            }
            continue;
        };

        splits += 1;
        if splits > max_splits {
            return None;
        }

        let n = ring.len();
        // Loop A: x -> ring[i+1..=j]
        let mut loop_a = Vec::with_capacity(j - i + 1);
        loop_a.push(x);
        loop_a.extend_from_slice(&ring[i + 1..=j]);
        // Loop B: x -> ring[j+1..n] -> ring[0..=i]
        let mut loop_b = Vec::with_capacity(n - (j - i) + 1);
        loop_b.push(x);
        loop_b.extend_from_slice(&ring[j + 1..]);
        loop_b.extend_from_slice(&ring[..=i]);

        pending.push(loop_a);
        pending.push(loop_b);
    }

    Some(done)
}

/// Offset one ring and keep the loops that are a true offset of it: same
/// winding as the input and no vertex closer to the source than `delta`.
///
/// A loop with every vertex too close is collapsed material and is dropped.
/// A loop with only some vertices too close folds back onto the source and
/// cannot be resolved, so the whole offset fails.
fn offset_ring_clean(points: &[Point2D], delta: f64, min_area: f64) -> Option<Vec<Polygon>> {
    let original = signed_area(points);
    if original.abs() < min_area {
        return Some(Vec::new());
    }
    let source = Polygon::closed(points.to_vec());
    let clearance = delta.abs() * (1.0 - 1e-6);
    let grid = EdgeGrid::new([&source], clearance);
    let loops = split_self_intersections(offset_ring_raw(points, delta))?;

    let mut kept = Vec::new();
    for ring in loops {
        let area = signed_area(&ring);
        if area.abs() < min_area || area.signum() != original.signum() {
            continue;
        }
        let close = ring.iter().filter(|p| grid.any_within(p, clearance)).count();
        if close == 0 {
            kept.push(Polygon::closed(ring));
        } else if close < ring.len() {
            return None;
        }
    }
    Some(kept)
}

/// Offset one polygon by `delta` toward the left of its edges, split into simple loops.
pub fn offset_polygon(polygon: &Polygon, delta: f64, min_area: f64) -> Option<Vec<Polygon>> {
    offset_ring_clean(&polygon.points, delta, min_area)
}

/// Shrink a region by `distance` into zero or more regions.
///
/// `None` means the offset loops could not be resolved into clean regions.
pub fn offset_region(
    region: &Region,
    distance: f64,
    policy: OffsetPolicy,
    min_area: f64,
) -> Option<Vec<Region>> {
    let outers = offset_ring_clean(&region.outer.points, distance, min_area)?;
    let mut holes = Vec::new();
    for hole in &region.holes {
        holes.extend(offset_ring_clean(&hole.points, distance, min_area)?);
    }

    if outers.is_empty() {
        return Some(Vec::new());
    }

    let mut regions = match policy {
        OffsetPolicy::Fast => group_loops(outers, holes)?,
        OffsetPolicy::Exact => overlay_loops(&outers, &holes, min_area),
    };

    for r in &mut regions {
        r.canonicalize();
    }
    regions.sort_by(|a, b| compare_points(&min_point(&a.outer.points), &min_point(&b.outer.points)));
    Some(regions)
}

/// Pair loops by containment. Fails when a hole loop crosses an outer loop.
fn group_loops(outers: Vec<Polygon>, holes: Vec<Polygon>) -> Option<Vec<Region>> {
    for outer in &outers {
        for hole in &holes {
            if rings_cross(outer, hole) {
                return None;
            }
        }
    }

    let mut regions: Vec<Region> = outers
        .into_iter()
        // an outer loop swallowed by a grown hole has no material left
        .filter(|o| !holes.iter().any(|h| h.contains_point(&o.points[0])))
        .map(|o| Region::new(o, Vec::new()))
        .collect();

    for hole in holes {
        let sample = hole.points[0];
        if let Some(owner) = regions.iter_mut().find(|r| r.outer.contains_point(&sample)) {
            owner.holes.push(hole);
        }
    }

    Some(regions)
}

/// Resolve outer and hole loops together: union of outers minus union of holes.
fn overlay_loops(outers: &[Polygon], holes: &[Polygon], min_area: f64) -> Vec<Region> {
    let subject: Vec<Vec<[f64; 2]>> = outers.iter().map(to_path).collect();
    let clip: Vec<Vec<[f64; 2]>> = holes.iter().map(to_path).collect();

    let shapes = subject.overlay(&clip, OverlayRule::Difference, FillRule::NonZero);

    shapes
        .iter()
        .filter_map(|shape| {
            let (outer, holes) = shape.split_first()?;
            let outer = from_path(outer);
            if outer.area() < min_area {
                return None;
            }
            let holes = holes
                .iter()
                .map(|h| from_path(h))
                .filter(|h| h.area() >= min_area)
                .collect();
            Some(Region::new(outer, holes))
        })
        .collect()
}

fn to_path(polygon: &Polygon) -> Vec<[f64; 2]> {
    polygon.points.iter().map(|p| [p.x, p.y]).collect()
}

fn from_path(path: &[[f64; 2]]) -> Polygon {
    Polygon::closed(path.iter().map(|p| Point2D::new(p[0], p[1])).collect())
}

/// True when any edge of `a` properly crosses any edge of `b`.
fn rings_cross(a: &Polygon, b: &Polygon) -> bool {
    let (ba, bb) = (a.bounding_box(), b.bounding_box());
    if ba.max.x < bb.min.x || bb.max.x < ba.min.x || ba.max.y < bb.min.y || bb.max.y < ba.min.y {
        return false;
    }
    a.edges().any(|(a1, a2)| {
        b.edges().any(|(b1, b2)| {
            segment_intersection(&a1, &a2, &b1, &b2)
                .map_or(false, |(t, u)| t > 1e-9 && t < 1.0 - 1e-9 && u > 1e-9 && u < 1.0 - 1e-9)
        })
    })
}

/// Whether a ring is a configured perimeter or an extra skin ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingKind {
    Shell,
    Skin,
}

/// All regions at one offset depth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellRing {
    pub index: usize,
    pub kind: RingKind,
    pub regions: Vec<Region>,
}

impl ShellRing {
    pub fn polygons(&self) -> impl Iterator<Item = &Polygon> {
        self.regions.iter().flat_map(Region::polygons)
    }

    pub fn area(&self) -> f64 {
        self.regions.iter().map(Region::area).sum()
    }

    /// Inside some region of this ring, or within `tolerance` of its boundary.
    pub fn contains_point_with_tolerance(&self, point: &Point2D, tolerance: f64) -> bool {
        self.regions
            .iter()
            .any(|r| r.contains_point_with_tolerance(point, tolerance))
    }
}

/// Concentric rings of one original region, outermost first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellSet {
    pub rings: Vec<ShellRing>,
}

impl ShellSet {
    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    pub fn outermost(&self) -> Option<&ShellRing> {
        self.rings.first()
    }

    pub fn innermost(&self) -> Option<&ShellRing> {
        self.rings.last()
    }
}

/// Shell rings for one region plus any offset failures that cut it short.
#[derive(Debug, Clone, Default)]
pub struct ShellOutcome {
    pub shells: ShellSet,
    pub warnings: Vec<OffsetError>,
}

/// Loops smaller than this are considered collapsed.
pub fn collapse_area(settings: &SlicingSettings) -> f64 {
    let w = settings.extrusion_width / 10.0;
    w * w
}

/// Offset a region inward into `shell_count` shells followed by
/// `skins_count` skin rings. Ring 0 sits half a width inside the contour,
/// every further ring one full width inside the previous one.
///
/// Generation stops early for a branch that collapses or cannot be resolved.
pub fn generate_shells(region: &Region, settings: &SlicingSettings) -> ShellOutcome {
    let width = settings.extrusion_width;
    let total = if settings.shell_only {
        1
    } else {
        settings.shell_count + settings.skins_count
    };
    let min_area = collapse_area(settings);
    let tolerance = settings.tolerance_epsilon;

    // Sliced outlines carry near-collinear vertices where the plane crosses
    // a face diagonal.
    let mut source = region.clone();
    source.outer.simplify(tolerance);
    for hole in &mut source.holes {
        hole.simplify(tolerance);
    }

    let mut outcome = ShellOutcome::default();
    let mut current = vec![source];

    for ring in 0..total {
        let distance = if ring == 0 { width / 2.0 } else { width };
        let mut next = Vec::new();

        for parent in &current {
            let Some(children) = offset_region(parent, distance, settings.offset_policy, min_area)
            else {
                outcome
                    .warnings
                    .push(OffsetError::UnresolvedIntersection { ring });
                continue;
            };

            let escaped = children.iter().any(|child| {
                child
                    .polygons()
                    .flat_map(|p| p.points.iter())
                    .any(|pt| !parent.contains_point_with_tolerance(pt, tolerance))
            });
            if escaped {
                outcome.warnings.push(OffsetError::EscapedParent { ring });
                continue;
            }

            next.extend(children);
        }

        if next.is_empty() {
            break;
        }

        let kind = if ring < settings.shell_count {
            RingKind::Shell
        } else {
            RingKind::Skin
        };
        outcome.shells.rings.push(ShellRing {
            index: ring,
            kind,
            regions: next.clone(),
        });
        current = next;
    }

    outcome
}
