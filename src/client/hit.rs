//! Eraser hit-testing: is a pointer position close enough to an element?
//!
//! Distances are measured in canvas units against the element outline, not
//! its fill: erasing a rectangle means touching one of its edges.

use crate::element::{Element, ElementKind, Point};

/// Base pointer tolerance, widened by half the element's stroke size.
pub const ERASE_TOLERANCE: f64 = 5.0;

/// Approximate glyph width as a fraction of the font size.
const TEXT_WIDTH_FACTOR: f64 = 0.5;

/// True when `pt` lies within the erase tolerance of `el`.
#[must_use]
pub fn is_point_near_element(el: &Element, pt: Point) -> bool {
    let tolerance = ERASE_TOLERANCE + el.size / 2.0;
    match el.kind {
        ElementKind::Line | ElementKind::Arrow => {
            endpoints(el).is_some_and(|(a, b)| distance_to_segment(pt, a, b) <= tolerance)
        }
        ElementKind::Rectangle => endpoints(el).is_some_and(|(a, b)| near_rectangle(pt, a, b, tolerance)),
        ElementKind::Circle => endpoints(el).is_some_and(|(a, b)| near_ellipse(pt, a, b, tolerance)),
        ElementKind::Brush => near_polyline(pt, el.points.as_deref().unwrap_or_default(), tolerance),
        ElementKind::Text => near_text(el, pt, tolerance),
    }
}

fn endpoints(el: &Element) -> Option<(Point, Point)> {
    Some((Point { x: el.x1?, y: el.y1? }, Point { x: el.x2?, y: el.y2? }))
}

fn distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return distance(p, a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    distance(p, Point { x: a.x + t * dx, y: a.y + t * dy })
}

fn near_rectangle(p: Point, a: Point, b: Point, tolerance: f64) -> bool {
    let top_right = Point { x: b.x, y: a.y };
    let bottom_left = Point { x: a.x, y: b.y };
    [(a, top_right), (top_right, b), (b, bottom_left), (bottom_left, a)]
        .into_iter()
        .any(|(s, e)| distance_to_segment(p, s, e) <= tolerance)
}

fn near_ellipse(p: Point, a: Point, b: Point, tolerance: f64) -> bool {
    let cx = (a.x + b.x) / 2.0;
    let cy = (a.y + b.y) / 2.0;
    let rx = (b.x - a.x).abs() / 2.0;
    let ry = (b.y - a.y).abs() / 2.0;
    if rx == 0.0 || ry == 0.0 {
        return distance_to_segment(p, a, b) <= tolerance;
    }

    let dx = p.x - cx;
    let dy = p.y - cy;
    let from_center = dx.hypot(dy);
    if from_center == 0.0 {
        return rx.min(ry) <= tolerance;
    }
    // Radius of the ellipse along the ray from its center through `p`.
    let angle = dy.atan2(dx);
    let radius = (rx * ry) / ((ry * angle.cos()).powi(2) + (rx * angle.sin()).powi(2)).sqrt();
    (from_center - radius).abs() <= tolerance
}

fn near_polyline(p: Point, points: &[Point], tolerance: f64) -> bool {
    match points {
        [] => false,
        [only] => distance(p, *only) <= tolerance,
        _ => points
            .windows(2)
            .any(|pair| distance_to_segment(p, pair[0], pair[1]) <= tolerance),
    }
}

fn near_text(el: &Element, p: Point, tolerance: f64) -> bool {
    let (Some(x), Some(y)) = (el.x1, el.y1) else {
        return false;
    };
    #[allow(clippy::cast_precision_loss)]
    let chars = el.text.as_deref().map_or(0, |t| t.chars().count()).max(1) as f64;
    let width = chars * el.size * TEXT_WIDTH_FACTOR;
    let height = el.size;
    p.x >= x - tolerance && p.x <= x + width + tolerance && p.y >= y - tolerance && p.y <= y + height + tolerance
}

#[cfg(test)]
#[path = "hit_test.rs"]
mod tests;
