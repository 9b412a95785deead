// ============================================================================
// STROKE SMOOTHING — quadratic Bézier interpolation between pointer samples
// ============================================================================
//
// Pure: same samples + params → same cell sequence.  Each consecutive pair
// (p0, p1) becomes a quadratic curve whose control point leans along the
// tangent implied by the neighbors:
//
//   first segment   cp = p1 - (p2 - p0) * tension
//   last segment    cp = p0 + (p1 - p_prev) * tension
//   interior        average of the two above
//   lone segment    cp = midpoint (a straight line)
//
// The control point is kept within dist/2 of the segment midpoint, so with
// two samples per pixel consecutive cells are never more than one apart.

use egui::{Pos2, Vec2};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothingParams {
    /// Curve samples per pixel of segment length.
    pub points_per_pixel: f32,
    /// How far control points lean along the neighbor tangent (0 = polyline).
    pub tension: f32,
    /// Pairs closer than this emit only their end point.
    pub min_segment_distance: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            points_per_pixel: 2.0,
            tension: 0.25,
            min_segment_distance: 0.5,
        }
    }
}

/// Round half up on both axes (consistent across zero, unlike `f32::round`).
#[inline]
pub fn to_cell(p: Pos2) -> (i32, i32) {
    ((p.x + 0.5).floor() as i32, (p.y + 0.5).floor() as i32)
}

fn quad_point(p0: Pos2, cp: Pos2, p1: Pos2, t: f32) -> Pos2 {
    let mt = 1.0 - t;
    Pos2::new(
        mt * mt * p0.x + 2.0 * mt * t * cp.x + t * t * p1.x,
        mt * mt * p0.y + 2.0 * mt * t * cp.y + t * t * p1.y,
    )
}

fn control_point(points: &[Pos2], i: usize, tension: f32) -> Pos2 {
    let p0 = points[i];
    let p1 = points[i + 1];
    let mid = p0 + (p1 - p0) * 0.5;

    let from_next: Option<Pos2> = points.get(i + 2).map(|&p2| p1 - (p2 - p0) * tension);
    let from_prev: Option<Pos2> = i.checked_sub(1).map(|j| p0 + (p1 - points[j]) * tension);

    let cp = match (from_prev, from_next) {
        (Some(a), Some(b)) => a + (b - a) * 0.5,
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => mid,
    };

    let limit = p0.distance(p1) * 0.5;
    let offset: Vec2 = cp - mid;
    if offset.length() > limit && offset.length() > 0.0 {
        mid + offset * (limit / offset.length())
    } else {
        cp
    }
}

/// Smooth a run of world-space samples into integer cells.  The first cell
/// is always `to_cell(points[0])`; consecutive duplicates are dropped.
pub fn smooth_points(points: &[Pos2], params: &SmoothingParams) -> Vec<(i32, i32)> {
    let Some(&first) = points.first() else {
        return Vec::new();
    };

    let mut out = vec![to_cell(first)];
    let push = |cell: (i32, i32), out: &mut Vec<(i32, i32)>| {
        if out.last() != Some(&cell) {
            out.push(cell);
        }
    };

    let ppp = params.points_per_pixel.max(f32::EPSILON);
    for i in 0..points.len().saturating_sub(1) {
        let (p0, p1) = (points[i], points[i + 1]);
        let dist = p0.distance(p1);
        if dist < params.min_segment_distance {
            push(to_cell(p1), &mut out);
            continue;
        }

        let cp = control_point(points, i, params.tension);
        let steps = (dist * ppp).ceil().max(1.0) as u32;
        for k in 1..=steps {
            let t = k as f32 / steps as f32;
            push(to_cell(quad_point(p0, cp, p1, t)), &mut out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chebyshev(a: (i32, i32), b: (i32, i32)) -> i32 {
        (a.0 - b.0).abs().max((a.1 - b.1).abs())
    }

    #[test]
    fn single_sample_is_a_single_cell() {
        let cells = smooth_points(&[Pos2::new(2.4, -3.6)], &SmoothingParams::default());
        assert_eq!(cells, vec![(2, -4)]);
        assert!(smooth_points(&[], &SmoothingParams::default()).is_empty());
    }

    #[test]
    fn two_samples_trace_a_straight_line() {
        let cells = smooth_points(&[Pos2::new(0.0, 0.0), Pos2::new(10.0, 0.0)], &SmoothingParams::default());
        let expected: Vec<_> = (0..=10).map(|x| (x, 0)).collect();
        assert_eq!(cells, expected);
    }

    #[test]
    fn fast_motion_leaves_no_gaps() {
        let samples = [
            Pos2::new(-40.0, -40.0),
            Pos2::new(25.0, -30.0),
            Pos2::new(-10.0, 35.0),
            Pos2::new(40.0, 41.0),
            Pos2::new(41.0, 41.2),
            Pos2::new(-38.0, 0.0),
        ];
        let cells = smooth_points(&samples, &SmoothingParams::default());
        assert_eq!(cells.first(), Some(&(-40, -40)));
        assert_eq!(cells.last(), Some(&(-38, 0)));
        for pair in cells.windows(2) {
            assert_ne!(pair[0], pair[1], "consecutive duplicate");
            assert!(chebyshev(pair[0], pair[1]) <= 1, "gap between {:?} and {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn near_coincident_pair_emits_one_point() {
        let cells = smooth_points(&[Pos2::new(0.0, 0.0), Pos2::new(0.2, 0.1)], &SmoothingParams::default());
        assert_eq!(cells, vec![(0, 0)]);
    }

    #[test]
    fn smoothing_is_deterministic() {
        let samples = [Pos2::new(1.0, 1.0), Pos2::new(7.5, 3.0), Pos2::new(2.0, 9.0)];
        let p = SmoothingParams::default();
        assert_eq!(smooth_points(&samples, &p), smooth_points(&samples, &p));
    }

    #[test]
    fn interior_segments_bend_toward_neighbors() {
        let p = SmoothingParams::default();
        let corner = [Pos2::new(0.0, 0.0), Pos2::new(20.0, 0.0), Pos2::new(20.0, 20.0)];
        let curved = smooth_points(&corner, &p);
        let straight = smooth_points(&corner, &SmoothingParams { tension: 0.0, ..p });
        assert_ne!(curved, straight);
        // Both still pass through every sample.
        for s in corner {
            assert!(curved.contains(&to_cell(s)));
        }
    }
}
