// SPDX-License-Identifier: MIT
//! Hotspots: shaped regions over the base image carrying arbitrary data
//!
//! Shapes are a closed enum; all geometry is resolved by exhaustive match.

pub mod index;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContainerError, Result};

pub use index::{
    HotspotStats, LayoutOrder, SpatialIndex, DEFAULT_CELL_SIZE, MAX_CELLS_PER_HOTSPOT,
};

/// Default hotspot priority
pub const DEFAULT_PRIORITY: u8 = 5;

/// Valid priority range
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Closed-interval intersection (touching edges intersect)
    #[inline]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_x < other.min_x
            || other.max_x < self.min_x
            || self.max_y < other.min_y
            || other.max_y < self.min_y)
    }

    #[inline]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }
}

/// Hotspot geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Rectangle { x1: f64, y1: f64, x2: f64, y2: f64 },
    Circle { cx: f64, cy: f64, radius: f64 },
    Polygon { points: Vec<(f64, f64)> },
}

impl Shape {
    pub fn rectangle(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Shape::Rectangle { x1, y1, x2, y2 }
    }

    pub fn circle(cx: f64, cy: f64, radius: f64) -> Self {
        Shape::Circle { cx, cy, radius }
    }

    pub fn polygon(points: impl Into<Vec<(f64, f64)>>) -> Self {
        Shape::Polygon {
            points: points.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Rectangle { .. } => "rectangle",
            Shape::Circle { .. } => "circle",
            Shape::Polygon { .. } => "polygon",
        }
    }

    /// Check shape-specific coordinate sanity
    pub fn validate(&self) -> Result<()> {
        match self {
            Shape::Rectangle { x1, y1, x2, y2 } => {
                if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
                    return Err(ContainerError::validation(
                        "Rectangle coordinates must be finite",
                    ));
                }
                if x1 >= x2 || y1 >= y2 {
                    return Err(ContainerError::validation(format!(
                        "Invalid rectangle ({}, {}, {}, {}): expected x1 < x2 and y1 < y2",
                        x1, y1, x2, y2
                    )));
                }
            }
            Shape::Circle { cx, cy, radius } => {
                if ![cx, cy, radius].iter().all(|v| v.is_finite()) {
                    return Err(ContainerError::validation(
                        "Circle coordinates must be finite",
                    ));
                }
                if *radius <= 0.0 {
                    return Err(ContainerError::validation(format!(
                        "Invalid circle radius: {}",
                        radius
                    )));
                }
            }
            Shape::Polygon { points } => {
                if points.len() < 3 {
                    return Err(ContainerError::validation(format!(
                        "Polygon needs at least 3 vertices, got {}",
                        points.len()
                    )));
                }
                if !points.iter().all(|(x, y)| x.is_finite() && y.is_finite()) {
                    return Err(ContainerError::validation(
                        "Polygon coordinates must be finite",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Exact containment; boundaries count as inside for rectangles and circles
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        match self {
            Shape::Rectangle { x1, y1, x2, y2 } => *x1 <= x && x <= *x2 && *y1 <= y && y <= *y2,
            Shape::Circle { cx, cy, radius } => (x - cx).hypot(y - cy) <= *radius,
            Shape::Polygon { points } => point_in_polygon(x, y, points),
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            Shape::Rectangle { x1, y1, x2, y2 } => BoundingBox::new(*x1, *y1, *x2, *y2),
            Shape::Circle { cx, cy, radius } => {
                BoundingBox::new(cx - radius, cy - radius, cx + radius, cy + radius)
            }
            Shape::Polygon { points } => points.iter().fold(
                BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |bbox, &(x, y)| {
                    BoundingBox::new(
                        bbox.min_x.min(x),
                        bbox.min_y.min(y),
                        bbox.max_x.max(x),
                        bbox.max_y.max(y),
                    )
                },
            ),
        }
    }

    /// Rectangle/circle center, or the vertex centroid of a polygon
    pub fn center(&self) -> (f64, f64) {
        match self {
            Shape::Rectangle { x1, y1, x2, y2 } => ((x1 + x2) / 2.0, (y1 + y2) / 2.0),
            Shape::Circle { cx, cy, .. } => (*cx, *cy),
            Shape::Polygon { points } => {
                let n = points.len().max(1) as f64;
                let (sx, sy) = points
                    .iter()
                    .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
                (sx / n, sy / n)
            }
        }
    }

    pub fn area(&self) -> f64 {
        match self {
            Shape::Rectangle { x1, y1, x2, y2 } => (x2 - x1) * (y2 - y1),
            Shape::Circle { radius, .. } => std::f64::consts::PI * radius * radius,
            Shape::Polygon { points } => shoelace_area(points),
        }
    }

    /// Exact test for two rectangles, bounding-box approximation otherwise
    pub fn overlaps(&self, other: &Shape) -> bool {
        match (self, other) {
            (
                Shape::Rectangle { x1, y1, x2, y2 },
                Shape::Rectangle {
                    x1: ox1,
                    y1: oy1,
                    x2: ox2,
                    y2: oy2,
                },
            ) => !(x2 < ox1 || ox2 < x1 || y2 < oy1 || oy2 < y1),
            _ => self.bounding_box().intersects(&other.bounding_box()),
        }
    }
}

/// Ray casting (odd number of crossings means inside)
fn point_in_polygon(x: f64, y: f64, points: &[(f64, f64)]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let (mut p1x, mut p1y) = points[0];
    for i in 1..=n {
        let (p2x, p2y) = points[i % n];
        if y > p1y.min(p2y) && y <= p1y.max(p2y) && x <= p1x.max(p2x) {
            // p1y != p2y holds here because y lies strictly above the lower endpoint
            let x_intersection = (y - p1y) * (p2x - p1x) / (p2y - p1y) + p1x;
            if p1x == p2x || x <= x_intersection {
                inside = !inside;
            }
        }
        p1x = p2x;
        p1y = p2y;
    }
    inside
}

fn shoelace_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    let twice_area: f64 = (0..n)
        .map(|i| {
            let (xi, yi) = points[i];
            let (xj, yj) = points[(i + 1) % n];
            xi * yj - xj * yi
        })
        .sum();
    twice_area.abs() / 2.0
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// A shaped, interactive region with associated data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub id: String,
    pub shape: Shape,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub clickable: bool,
    #[serde(default)]
    pub lazy_load: bool,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub layer_index: u32,
}

impl Hotspot {
    /// Create a hotspot with a fresh random id and default presentation flags
    pub fn new(shape: Shape, data: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), shape, data)
    }

    pub fn with_id(id: impl Into<String>, shape: Shape, data: Value) -> Self {
        Self {
            id: id.into(),
            shape,
            data,
            visible: true,
            clickable: true,
            lazy_load: false,
            priority: DEFAULT_PRIORITY,
            layer_index: 0,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn lazy(mut self, lazy_load: bool) -> Self {
        self.lazy_load = lazy_load;
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn layer(mut self, layer_index: u32) -> Self {
        self.layer_index = layer_index;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ContainerError::validation("Hotspot id must not be empty"));
        }
        if !PRIORITY_RANGE.contains(&self.priority) {
            return Err(ContainerError::validation(format!(
                "Hotspot {} priority {} outside 1..=10",
                self.id, self.priority
            )));
        }
        self.shape.validate()
    }

    #[inline]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.shape.contains_point(x, y)
    }

    #[inline]
    pub fn bounding_box(&self) -> BoundingBox {
        self.shape.bounding_box()
    }

    pub fn overlaps(&self, other: &Hotspot) -> bool {
        self.shape.overlaps(&other.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn triangle() -> Shape {
        Shape::polygon(vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)])
    }

    #[test]
    fn test_rectangle_validation() {
        assert!(Shape::rectangle(0.0, 0.0, 1.0, 1.0).validate().is_ok());
        assert!(Shape::rectangle(5.0, 0.0, 5.0, 1.0).validate().is_err());
        assert!(Shape::rectangle(0.0, 2.0, 1.0, 1.0).validate().is_err());
        assert!(Shape::rectangle(0.0, 0.0, f64::NAN, 1.0).validate().is_err());
    }

    #[test]
    fn test_circle_and_polygon_validation() {
        assert!(Shape::circle(0.0, 0.0, 0.0).validate().is_err());
        assert!(Shape::circle(0.0, 0.0, 3.0).validate().is_ok());
        assert!(Shape::polygon(vec![(0.0, 0.0), (1.0, 1.0)]).validate().is_err());
        assert!(triangle().validate().is_ok());
    }

    #[test]
    fn test_rectangle_contains_boundary() {
        let rect = Shape::rectangle(10.0, 10.0, 100.0, 100.0);
        assert!(rect.contains_point(10.0, 10.0));
        assert!(rect.contains_point(100.0, 55.0));
        assert!(!rect.contains_point(100.1, 55.0));
    }

    #[test]
    fn test_circle_contains() {
        let circle = Shape::circle(50.0, 50.0, 10.0);
        assert!(circle.contains_point(60.0, 50.0));
        assert!(!circle.contains_point(58.0, 58.0));
        assert_eq!(circle.bounding_box(), BoundingBox::new(40.0, 40.0, 60.0, 60.0));
    }

    #[test]
    fn test_polygon_ray_casting() {
        let tri = triangle();
        assert!(tri.contains_point(2.0, 2.0));
        assert!(!tri.contains_point(8.0, 8.0));
        assert!(!tri.contains_point(-1.0, 2.0));

        let concave = Shape::polygon(vec![
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (5.0, 3.0),
            (0.0, 10.0),
        ]);
        assert!(concave.contains_point(2.0, 2.0));
        assert!(!concave.contains_point(5.0, 8.0));
    }

    #[test]
    fn test_areas() {
        assert_eq!(Shape::rectangle(0.0, 0.0, 4.0, 5.0).area(), 20.0);
        assert_eq!(triangle().area(), 50.0);
        let circle_area = Shape::circle(0.0, 0.0, 2.0).area();
        assert!((circle_area - 4.0 * std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_centers_and_bounding_boxes() {
        assert_eq!(Shape::rectangle(0.0, 0.0, 4.0, 2.0).center(), (2.0, 1.0));
        assert_eq!(triangle().bounding_box(), BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let (cx, cy) = triangle().center();
        assert!((cx - 10.0 / 3.0).abs() < 1e-12 && (cy - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_overlaps() {
        let a = Shape::rectangle(0.0, 0.0, 10.0, 10.0);
        let b = Shape::rectangle(10.0, 10.0, 20.0, 20.0);
        let c = Shape::rectangle(11.0, 0.0, 20.0, 5.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));

        // Bounding boxes touch even though the circle misses the corner
        let circle = Shape::circle(25.0, 25.0, 5.0);
        assert!(b.overlaps(&circle));
        assert!(!b.contains_point(20.0, 20.0) || !circle.contains_point(20.0, 20.0));
    }

    #[test]
    fn test_hotspot_priority_validation() {
        let shape = Shape::rectangle(0.0, 0.0, 1.0, 1.0);
        assert!(Hotspot::new(shape.clone(), json!({})).validate().is_ok());
        assert!(Hotspot::new(shape.clone(), json!({})).priority(0).validate().is_err());
        assert!(Hotspot::new(shape, json!({})).priority(11).validate().is_err());
    }

    #[test]
    fn test_hotspot_json_shape() {
        let hotspot = Hotspot::with_id("h1", Shape::circle(1.0, 2.0, 3.0), json!({"note": "x"}))
            .priority(7);
        let value = serde_json::to_value(&hotspot).unwrap();
        assert_eq!(value["shape"]["type"], "circle");
        assert_eq!(value["shape"]["radius"], 3.0);
        assert_eq!(value["priority"], 7);

        let back: Hotspot = serde_json::from_value(value).unwrap();
        assert_eq!(back, hotspot);
    }

    #[test]
    fn test_hotspot_defaults_on_deserialize() {
        let hotspot: Hotspot = serde_json::from_value(json!({
            "id": "h",
            "shape": {"type": "rectangle", "x1": 0.0, "y1": 0.0, "x2": 1.0, "y2": 1.0}
        }))
        .unwrap();
        assert!(hotspot.visible && hotspot.clickable && !hotspot.lazy_load);
        assert_eq!(hotspot.priority, DEFAULT_PRIORITY);
        assert_eq!(hotspot.data, Value::Null);
    }
}
