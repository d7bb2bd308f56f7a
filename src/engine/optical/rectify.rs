//! Geometric rectification into canonical sheet space.
//!
//! Three solid square fiducials (top-left, bottom-right, bottom-left) and the identity
//! marker's centroid (top-right) give four correspondences for a perspective transform.
//! With only two fiducials the fourth point is predicted from an affine fit of the other
//! three. Anything less falls back to the unrectified frame.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::otsu_level;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use crate::engine::optical::identity::IdentityMarker;
use crate::engine::optical::template::{
    ReferenceRole, SheetTemplate, CANONICAL_HEIGHT, CANONICAL_WIDTH,
};

const DETECTION_MAX_SIDE: u32 = 2000;
const MIN_SOLIDITY: f32 = 0.88;
const MAX_ASPECT_SKEW: f32 = 0.25;
const MARKER_MARGIN: f32 = 0.1;
const MAX_CANDIDATES: usize = 10;
const MAX_SHAPE_ERROR: f32 = 0.06;

/// Axis-aligned box in output image pixels, `(min_x, min_y, max_x, max_y)`.
pub(crate) type Zone = (f32, f32, f32, f32);

#[derive(Debug, Clone)]
pub(crate) enum Rectification {
    Rectified {
        image: GrayImage,
        marker_zone: Zone,
    },
    /// Degraded mode: the source resized to canonical width. Results are low-confidence.
    Unrectified {
        image: GrayImage,
        marker_zone: Zone,
        reason: String,
    },
}

impl Rectification {
    pub(crate) fn image(&self) -> &GrayImage {
        match self {
            Self::Rectified { image, .. } | Self::Unrectified { image, .. } => image,
        }
    }

    pub(crate) fn marker_zone(&self) -> Zone {
        match self {
            Self::Rectified { marker_zone, .. } | Self::Unrectified { marker_zone, .. } => {
                *marker_zone
            }
        }
    }

    pub(crate) fn is_rectified(&self) -> bool {
        matches!(self, Self::Rectified { .. })
    }

    pub(crate) fn reason(&self) -> Option<&str> {
        match self {
            Self::Rectified { .. } => None,
            Self::Unrectified { reason, .. } => Some(reason),
        }
    }
}

pub(crate) fn rectify(
    source: &GrayImage,
    marker: &IdentityMarker,
    template: &SheetTemplate,
) -> Rectification {
    let fiducials = find_fiducials(source, marker);
    let Some(references) = assign_roles(&fiducials, marker.centroid(), template) else {
        return unrectified(
            source,
            marker,
            format!("found {} usable fiducial markers", fiducials.len()),
        );
    };

    let src = ReferenceRole::ALL.map(|role| references.point(role));
    let dst = ReferenceRole::ALL.map(|role| template.reference_point(role));
    let Some(projection) = Projection::from_control_points(src, dst) else {
        return unrectified(source, marker, "reference points are degenerate".to_string());
    };

    let mut canonical = GrayImage::from_pixel(CANONICAL_WIDTH, CANONICAL_HEIGHT, Luma([255]));
    warp_into(source, &projection, Interpolation::Bilinear, Luma([255]), &mut canonical);

    tracing::debug!(
        fiducials = fiducials.len(),
        predicted = references.predicted.is_some(),
        "scan rectified"
    );
    Rectification::Rectified { image: canonical, marker_zone: template.marker_bounds() }
}

fn unrectified(source: &GrayImage, marker: &IdentityMarker, reason: String) -> Rectification {
    let factor = CANONICAL_WIDTH as f32 / source.width().max(1) as f32;
    let height = ((source.height() as f32 * factor).round() as u32).max(1);
    let image = if source.width() == CANONICAL_WIDTH {
        source.clone()
    } else {
        imageops::resize(source, CANONICAL_WIDTH, height, FilterType::Triangle)
    };

    let (min_x, min_y, max_x, max_y) = marker.bounds();
    tracing::warn!(%reason, "scan left unrectified");
    Rectification::Unrectified {
        image,
        marker_zone: (min_x * factor, min_y * factor, max_x * factor, max_y * factor),
        reason,
    }
}

/// Solid, near-square blobs about a tenth of the marker's side, centres in source pixels.
pub(crate) fn find_fiducials(source: &GrayImage, marker: &IdentityMarker) -> Vec<(f32, f32)> {
    let longest = source.width().max(source.height());
    let (image, factor) = if longest > DETECTION_MAX_SIDE {
        let factor = DETECTION_MAX_SIDE as f32 / longest as f32;
        let width = ((source.width() as f32 * factor).round() as u32).max(1);
        let height = ((source.height() as f32 * factor).round() as u32).max(1);
        (imageops::resize(source, width, height, FilterType::Triangle), factor)
    } else {
        (source.clone(), 1.0)
    };

    let level = otsu_level(&image);
    let binary = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] <= level {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let expected_side = marker.side() * factor / 10.0;
    let (min_x, min_y, max_x, max_y) = marker.bounds();
    let margin = marker.side() * MARKER_MARGIN;
    let in_marker = |x: f32, y: f32| {
        x >= min_x - margin && x <= max_x + margin && y >= min_y - margin && y <= max_y + margin
    };

    let mut found: Vec<(f32, (f32, f32))> = Vec::new();
    for contour in find_contours::<i32>(&binary) {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }
        let (left, top, right, bottom) = contour.points.iter().fold(
            (i32::MAX, i32::MAX, i32::MIN, i32::MIN),
            |(l, t, r, b), point| (l.min(point.x), t.min(point.y), r.max(point.x), b.max(point.y)),
        );
        let width = (right - left + 1) as f32;
        let height = (bottom - top + 1) as f32;
        if width < expected_side * 0.5 || width > expected_side * 2.0 {
            continue;
        }
        if (width / height - 1.0).abs() > MAX_ASPECT_SKEW {
            continue;
        }

        let mut ink = 0u32;
        for y in top..=bottom {
            for x in left..=right {
                if binary.get_pixel(x as u32, y as u32)[0] > 0 {
                    ink += 1;
                }
            }
        }
        if (ink as f32) < MIN_SOLIDITY * width * height {
            continue;
        }

        let center = (
            (left + right) as f32 / 2.0 / factor,
            (top + bottom) as f32 / 2.0 / factor,
        );
        if in_marker(center.0, center.1) {
            continue;
        }
        found.push((width * height, center));
    }

    found.sort_by(|a, b| b.0.total_cmp(&a.0));
    found.into_iter().take(MAX_CANDIDATES).map(|(_, center)| center).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct References {
    top_left: (f32, f32),
    top_right: (f32, f32),
    bottom_right: (f32, f32),
    bottom_left: (f32, f32),
    /// Role whose point was predicted rather than observed.
    pub(crate) predicted: Option<ReferenceRole>,
}

impl References {
    pub(crate) fn point(&self, role: ReferenceRole) -> (f32, f32) {
        match role {
            ReferenceRole::TopLeft => self.top_left,
            ReferenceRole::TopRight => self.top_right,
            ReferenceRole::BottomRight => self.bottom_right,
            ReferenceRole::BottomLeft => self.bottom_left,
        }
    }
}

/// Picks which detected blob plays which fiducial role by matching pairwise distances against
/// the template up to scale. Three matching fiducials are preferred over two.
pub(crate) fn assign_roles(
    fiducials: &[(f32, f32)],
    marker_center: (f32, f32),
    template: &SheetTemplate,
) -> Option<References> {
    let mut best: Option<(f32, Vec<(ReferenceRole, (f32, f32))>)> = None;
    for wanted in [3usize, 2] {
        for chosen in ordered_choices(fiducials.len(), wanted) {
            for roles in ordered_choices(ReferenceRole::FIDUCIALS.len(), wanted) {
                let mut pairs = vec![(ReferenceRole::TopRight, marker_center)];
                pairs.extend(
                    roles
                        .iter()
                        .zip(&chosen)
                        .map(|(role, index)| (ReferenceRole::FIDUCIALS[*role], fiducials[*index])),
                );
                let error = shape_error(&pairs, template);
                if error <= MAX_SHAPE_ERROR && best.as_ref().map_or(true, |(e, _)| error < *e) {
                    best = Some((error, pairs));
                }
            }
        }
        if best.is_some() {
            break;
        }
    }

    let (_, pairs) = best?;
    let observed = |role: ReferenceRole| {
        pairs.iter().find(|(candidate, _)| *candidate == role).map(|(_, point)| *point)
    };

    let mut predicted = None;
    let mut point = |role: ReferenceRole| -> Option<(f32, f32)> {
        if let Some(point) = observed(role) {
            return Some(point);
        }
        predicted = Some(role);
        let correspondences: Vec<_> =
            pairs.iter().map(|(role, point)| (template.reference_point(*role), *point)).collect();
        let fit = AffineFit::solve(&correspondences)?;
        Some(fit.apply(template.reference_point(role)))
    };

    let top_left = point(ReferenceRole::TopLeft)?;
    let top_right = point(ReferenceRole::TopRight)?;
    let bottom_right = point(ReferenceRole::BottomRight)?;
    let bottom_left = point(ReferenceRole::BottomLeft)?;
    Some(References { top_left, top_right, bottom_right, bottom_left, predicted })
}

/// Every ordered selection of `k` distinct indices below `n`.
fn ordered_choices(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for prefix in ordered_choices(n, k - 1) {
        for next in 0..n {
            if !prefix.contains(&next) {
                let mut choice = prefix.clone();
                choice.push(next);
                out.push(choice);
            }
        }
    }
    out
}

/// Relative RMS misfit of the pairwise distances after the best uniform scale.
fn shape_error(pairs: &[(ReferenceRole, (f32, f32))], template: &SheetTemplate) -> f32 {
    let mut observed = Vec::new();
    let mut expected = Vec::new();
    for (index, (role_a, point_a)) in pairs.iter().enumerate() {
        for (role_b, point_b) in &pairs[index + 1..] {
            observed.push(distance(*point_a, *point_b));
            expected.push(distance(
                template.reference_point(*role_a),
                template.reference_point(*role_b),
            ));
        }
    }

    let dot: f32 = observed.iter().zip(&expected).map(|(o, e)| o * e).sum();
    let norm: f32 = expected.iter().map(|e| e * e).sum();
    if norm <= f32::EPSILON || dot <= f32::EPSILON {
        return f32::INFINITY;
    }
    let scale = dot / norm;
    let residual: f32 =
        observed.iter().zip(&expected).map(|(o, e)| (o - scale * e).powi(2)).sum();
    (residual / (scale * scale * norm)).sqrt()
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// `x' = a x + b y + c`, `y' = d x + e y + f`, fitted exactly through three pairs.
#[derive(Debug, Clone, Copy)]
struct AffineFit {
    x: [f32; 3],
    y: [f32; 3],
}

impl AffineFit {
    fn solve(pairs: &[((f32, f32), (f32, f32))]) -> Option<Self> {
        let [(p1, q1), (p2, q2), (p3, q3)] = <[_; 3]>::try_from(pairs).ok()?;
        let det = p1.0 * (p2.1 - p3.1) - p1.1 * (p2.0 - p3.0) + (p2.0 * p3.1 - p3.0 * p2.1);
        if det.abs() < 1e-3 {
            return None;
        }

        let solve_axis = |v1: f32, v2: f32, v3: f32| -> [f32; 3] {
            let a = (v1 * (p2.1 - p3.1) - p1.1 * (v2 - v3) + (v2 * p3.1 - v3 * p2.1)) / det;
            let b = (p1.0 * (v2 - v3) - v1 * (p2.0 - p3.0) + (p2.0 * v3 - p3.0 * v2)) / det;
            let c = (p1.0 * (p2.1 * v3 - p3.1 * v2) - p1.1 * (p2.0 * v3 - p3.0 * v2)
                + v1 * (p2.0 * p3.1 - p3.0 * p2.1))
                / det;
            [a, b, c]
        };

        Some(Self { x: solve_axis(q1.0, q2.0, q3.0), y: solve_axis(q1.1, q2.1, q3.1) })
    }

    fn apply(&self, (u, v): (f32, f32)) -> (f32, f32) {
        (
            self.x[0] * u + self.x[1] * v + self.x[2],
            self.y[0] * u + self.y[1] * v + self.y[2],
        )
    }
}
