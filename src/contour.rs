//! Contour assembly: stitch unordered plane-section segments into closed loops
//! and group them into regions (outer boundary plus holes).

use crate::diagnostics::{AssemblyError, AssemblyWarning};
use crate::geometry::{compare_points, min_point, Orientation, Point2D, Polygon, Region, Segment2D};
use crate::settings::SlicingSettings;
use std::collections::HashMap;

/// Closed regions of one layer plus the recoverable issues found on the way.
#[derive(Debug, Clone, Default)]
pub struct AssembledContours {
    pub regions: Vec<Region>,
    pub warnings: Vec<AssemblyWarning>,
}

/// Build closed, orientation-normalised regions from a segment soup.
///
/// Fails only when an open chain is too long to be noise and its gap is too
/// wide to snap shut.
pub fn assemble_contours(
    segments: &[Segment2D],
    settings: &SlicingSettings,
) -> Result<AssembledContours, AssemblyError> {
    let mut warnings = Vec::new();
    let epsilon = settings.tolerance_epsilon;

    let loops = stitch_loops(segments, settings, &mut warnings)?;

    let min_area = epsilon * epsilon;
    let mut kept = Vec::with_capacity(loops.len());
    for mut polygon in loops {
        if settings.optimization > 0.0 {
            polygon.simplify(settings.optimization);
        }
        let area = polygon.area();
        if polygon.len() < 3 || area < min_area {
            warnings.push(AssemblyWarning::DegenerateLoop { area });
            continue;
        }
        kept.push(polygon);
    }

    let regions = build_regions(kept);
    log::trace!(
        "assembled {} segments into {} regions",
        segments.len(),
        regions.len()
    );

    Ok(AssembledContours { regions, warnings })
}

/// Discretized point key for hash map (handles floating point comparison)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CellKey {
    x: i64,
    y: i64,
}

impl CellKey {
    fn from_point(point: &Point2D, cell: f64) -> Self {
        Self {
            x: (point.x / cell).floor() as i64,
            y: (point.y / cell).floor() as i64,
        }
    }
}

/// Spatial hash of segment endpoints with `epsilon`-sized cells.
struct EndpointIndex<'a> {
    segments: &'a [Segment2D],
    cells: HashMap<CellKey, Vec<(usize, bool)>>,
    epsilon: f64,
}

impl<'a> EndpointIndex<'a> {
    fn new(segments: &'a [Segment2D], epsilon: f64) -> Self {
        let mut cells: HashMap<CellKey, Vec<(usize, bool)>> = HashMap::new();
        for (i, segment) in segments.iter().enumerate() {
            cells
                .entry(CellKey::from_point(&segment.start, epsilon))
                .or_default()
                .push((i, true));
            cells
                .entry(CellKey::from_point(&segment.end, epsilon))
                .or_default()
                .push((i, false));
        }
        Self {
            segments,
            cells,
            epsilon,
        }
    }

    /// Nearest unused segment with an endpoint within epsilon of `point`.
    /// Returns the segment index and its opposite endpoint.
    fn take_nearest(&self, point: &Point2D, used: &mut [bool]) -> Option<(usize, Point2D)> {
        let center = CellKey::from_point(point, self.epsilon);
        let mut best: Option<(f64, usize, bool)> = None;

        for dx in -1..=1 {
            for dy in -1..=1 {
                let key = CellKey {
                    x: center.x + dx,
                    y: center.y + dy,
                };
                let Some(entries) = self.cells.get(&key) else {
                    continue;
                };
                for &(idx, at_start) in entries {
                    if used[idx] {
                        continue;
                    }
                    let seg = &self.segments[idx];
                    let endpoint = if at_start { seg.start } else { seg.end };
                    let dist = (endpoint - point).norm();
                    if dist > self.epsilon {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some((d, i, _)) => dist < d || (dist == d && idx < i),
                    };
                    if better {
                        best = Some((dist, idx, at_start));
                    }
                }
            }
        }

        best.map(|(_, idx, at_start)| {
            used[idx] = true;
            let seg = &self.segments[idx];
            (idx, if at_start { seg.end } else { seg.start })
        })
    }
}

/// Greedy chain walk over the endpoint index.
fn stitch_loops(
    segments: &[Segment2D],
    settings: &SlicingSettings,
    warnings: &mut Vec<AssemblyWarning>,
) -> Result<Vec<Polygon>, AssemblyError> {
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    let epsilon = settings.tolerance_epsilon;
    let index = EndpointIndex::new(segments, epsilon);
    let mut used = vec![false; segments.len()];
    let mut loops = Vec::new();

    for start_idx in 0..segments.len() {
        if used[start_idx] {
            continue;
        }
        used[start_idx] = true;

        let mut chain = vec![segments[start_idx].start, segments[start_idx].end];
        let mut chain_segments = 1usize;

        let mut closed = extend_chain(&mut chain, &mut chain_segments, &index, &mut used, epsilon);
        if !closed {
            // Grow the other end too: the start segment may sit mid-contour.
            chain.reverse();
            closed = extend_chain(&mut chain, &mut chain_segments, &index, &mut used, epsilon);
        }

        if closed {
            loops.push(Polygon::closed(chain));
            continue;
        }

        let head = chain[0];
        let tail = chain[chain.len() - 1];
        let gap = (tail - head).norm();
        let length = Polygon::new(chain.clone(), false).perimeter();

        if length < settings.noise_chain_length {
            warnings.push(AssemblyWarning::NoiseChainDiscarded {
                segments: chain_segments,
                length,
            });
        } else if gap <= settings.max_close_gap && chain.len() >= 3 {
            warnings.push(AssemblyWarning::ChainForceClosed { gap });
            loops.push(Polygon::closed(chain));
        } else {
            return Err(AssemblyError::UnclosedGap {
                gap,
                x: tail.x,
                y: tail.y,
            });
        }
    }

    Ok(loops)
}

/// Extend the chain at its tail until it closes or runs out of candidates.
/// On closure the duplicated head point is removed and `true` returned.
fn extend_chain(
    chain: &mut Vec<Point2D>,
    chain_segments: &mut usize,
    index: &EndpointIndex<'_>,
    used: &mut [bool],
    epsilon: f64,
) -> bool {
    loop {
        let tail = chain[chain.len() - 1];
        if chain.len() >= 4 && (tail - chain[0]).norm() <= epsilon {
            chain.pop();
            return true;
        }

        match index.take_nearest(&tail, used) {
            Some((_, next)) => {
                chain.push(next);
                *chain_segments += 1;
            }
            None => return false,
        }
    }
}

/// Classify loops by nesting depth and group each outer loop with its holes.
///
/// A loop's depth is the number of larger loops containing it. Even depth is
/// material boundary (CCW), odd depth is a hole (CW) of its smallest container.
fn build_regions(mut loops: Vec<Polygon>) -> Vec<Region> {
    loops.sort_by(|a, b| {
        b.area()
            .total_cmp(&a.area())
            .then_with(|| compare_points(&min_point(&a.points), &min_point(&b.points)))
    });

    let n = loops.len();
    let mut depth = vec![0usize; n];
    let mut parent: Vec<Option<usize>> = vec![None; n];

    for i in 0..n {
        let sample = loops[i].points[0];
        for j in 0..i {
            if loops[j].contains_point(&sample) {
                depth[i] += 1;
                // sorted by decreasing area, so the last container is the tightest
                parent[i] = Some(j);
            }
        }
    }

    let mut region_of: Vec<Option<usize>> = vec![None; n];
    let mut regions: Vec<Region> = Vec::new();

    for i in 0..n {
        if depth[i] % 2 == 0 {
            region_of[i] = Some(regions.len());
            regions.push(Region::new(loops[i].clone(), Vec::new()));
        }
    }
    for i in 0..n {
        if depth[i] % 2 == 1 {
            let owner = parent[i].and_then(|p| region_of[p]);
            if let Some(r) = owner {
                let hole = loops[i].clone().with_orientation(Orientation::Cw);
                regions[r].holes.push(hole);
            }
        }
    }

    for region in &mut regions {
        region.canonicalize();
    }
    regions.sort_by(|a, b| compare_points(&min_point(&a.outer.points), &min_point(&b.outer.points)));
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(ax: f64, ay: f64, bx: f64, by: f64) -> Segment2D {
        Segment2D::free(Point2D::new(ax, ay), Point2D::new(bx, by))
    }

    fn square_segments(x0: f64, y0: f64, size: f64) -> Vec<Segment2D> {
        let x1 = x0 + size;
        let y1 = y0 + size;
        vec![
            seg(x0, y0, x1, y0),
            seg(x1, y0, x1, y1),
            seg(x1, y1, x0, y1),
            seg(x0, y1, x0, y0),
        ]
    }

    #[test]
    fn test_contour_building() {
        let segments = square_segments(0.0, 0.0, 1.0);
        let result = assemble_contours(&segments, &SlicingSettings::default()).unwrap();

        assert_eq!(result.regions.len(), 1);
        let outer = &result.regions[0].outer;
        assert!(outer.closed);
        assert_eq!(outer.points.len(), 4); // closing point is implicit
        assert!(outer.is_ccw());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_shuffled_and_flipped_segments_with_jitter() {
        // Out of order, mixed directions, endpoints off by less than epsilon
        let segments = vec![
            seg(10.0, 10.0, 0.0, 10.0002),
            seg(0.0, 0.0, 10.0, 0.0),
            seg(0.0, 0.0, 0.0001, 10.0),
            seg(10.0, 10.0, 10.0, 0.0003),
        ];
        let result = assemble_contours(&segments, &SlicingSettings::default()).unwrap();
        assert_eq!(result.regions.len(), 1);
        assert!((result.regions[0].outer.area() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_hole_is_oriented_clockwise() {
        let mut segments = square_segments(0.0, 0.0, 10.0);
        // Inner square given with CCW winding; it must come back as a CW hole
        segments.extend(square_segments(3.0, 3.0, 4.0));
        let result = assemble_contours(&segments, &SlicingSettings::default()).unwrap();

        assert_eq!(result.regions.len(), 1);
        let region = &result.regions[0];
        assert!(region.outer.is_ccw());
        assert_eq!(region.holes.len(), 1);
        assert!(!region.holes[0].is_ccw());
    }

    #[test]
    fn test_island_inside_hole_is_separate_region() {
        let mut segments = square_segments(0.0, 0.0, 20.0);
        segments.extend(square_segments(5.0, 5.0, 10.0));
        segments.extend(square_segments(8.0, 8.0, 4.0));
        let result = assemble_contours(&segments, &SlicingSettings::default()).unwrap();

        assert_eq!(result.regions.len(), 2);
        assert_eq!(result.regions[0].holes.len(), 1);
        assert!(result.regions[1].holes.is_empty());
        assert!(result.regions.iter().all(|r| r.outer.is_ccw()));
    }

    #[test]
    fn test_short_open_chain_is_noise() {
        let mut segments = square_segments(0.0, 0.0, 10.0);
        segments.push(seg(50.0, 50.0, 50.1, 50.0));
        let result = assemble_contours(&segments, &SlicingSettings::default()).unwrap();

        assert_eq!(result.regions.len(), 1);
        assert!(matches!(
            result.warnings.as_slice(),
            [AssemblyWarning::NoiseChainDiscarded { segments: 1, .. }]
        ));
    }

    #[test]
    fn test_small_gap_is_force_closed() {
        let segments = vec![
            seg(0.0, 0.0, 10.0, 0.0),
            seg(10.0, 0.0, 10.0, 10.0),
            seg(10.0, 10.0, 0.0, 10.0),
            seg(0.0, 10.0, 0.0, 0.1),
        ];
        let result = assemble_contours(&segments, &SlicingSettings::default()).unwrap();
        assert_eq!(result.regions.len(), 1);
        assert!(matches!(
            result.warnings.as_slice(),
            [AssemblyWarning::ChainForceClosed { .. }]
        ));
    }

    #[test]
    fn test_large_gap_is_fatal() {
        let segments = vec![
            seg(0.0, 0.0, 10.0, 0.0),
            seg(10.0, 0.0, 10.0, 10.0),
            seg(10.0, 10.0, 0.0, 10.0),
        ];
        let result = assemble_contours(&segments, &SlicingSettings::default());
        assert!(matches!(result, Err(AssemblyError::UnclosedGap { .. })));
    }

    #[test]
    fn test_chain_started_mid_contour_closes() {
        // First segment is in the middle of the walk order
        let segments = vec![
            seg(10.0, 0.0, 10.0, 10.0),
            seg(0.0, 10.0, 0.0, 0.0),
            seg(10.0, 10.0, 0.0, 10.0),
            seg(0.0, 0.0, 10.0, 0.0),
        ];
        let result = assemble_contours(&segments, &SlicingSettings::default()).unwrap();
        assert_eq!(result.regions.len(), 1);
        assert!(result.warnings.is_empty());
    }
}
