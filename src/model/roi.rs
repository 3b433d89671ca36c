//! Region-of-interest geometry.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::geometry::{AffineTransform, Point, Rect};

/// Minimum number of vertices required for a polygon to enclose an area.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Shape data for an object (in image coordinates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Roi {
    /// Single point marker.
    Point { x: f64, y: f64 },
    /// Axis-aligned rectangle defined by top-left corner and size.
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Axis-aligned ellipse inscribed in the given bounding box.
    Ellipse {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Closed polygon defined by vertices.
    Polygon { vertices: Vec<Point> },
    /// Open line through the vertices.
    Polyline { vertices: Vec<Point> },
}

impl Roi {
    /// Build a polygon ROI from `(x, y)` tuples.
    pub fn polygon(vertices: impl IntoIterator<Item = (f64, f64)>) -> Self {
        Roi::Polygon {
            vertices: vertices.into_iter().map(Point::from).collect(),
        }
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Roi::Rectangle {
            x,
            y,
            width,
            height,
        }
    }

    pub fn ellipse(x: f64, y: f64, width: f64, height: f64) -> Self {
        Roi::Ellipse {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the display name for this shape kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Roi::Point { .. } => "point",
            Roi::Rectangle { .. } => "rectangle",
            Roi::Ellipse { .. } => "ellipse",
            Roi::Polygon { .. } => "polygon",
            Roi::Polyline { .. } => "polyline",
        }
    }

    /// Whether this shape encloses an area that can be filled.
    pub fn is_area(&self) -> bool {
        match self {
            Roi::Point { .. } | Roi::Polyline { .. } => false,
            Roi::Rectangle { width, height, .. } | Roi::Ellipse { width, height, .. } => {
                *width > 0.0 && *height > 0.0
            }
            Roi::Polygon { vertices } => vertices.len() >= MIN_POLYGON_VERTICES,
        }
    }

    /// Get the bounding box of this shape.
    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Roi::Point { x, y } => Some(Rect::new(*x, *y, 0.0, 0.0)),
            Roi::Rectangle {
                x,
                y,
                width,
                height,
            }
            | Roi::Ellipse {
                x,
                y,
                width,
                height,
            } => Some(Rect::new(*x, *y, *width, *height)),
            Roi::Polygon { vertices } | Roi::Polyline { vertices } => Rect::enclosing(vertices),
        }
    }

    /// Outline of an area shape as a closed polygon.
    ///
    /// Ellipses are flattened into `segments` vertices. Returns None for
    /// points, polylines, and degenerate shapes.
    pub fn outline(&self, segments: usize) -> Option<Vec<Point>> {
        if !self.is_area() {
            return None;
        }
        match self {
            Roi::Rectangle {
                x,
                y,
                width,
                height,
            } => Some(rect_corners(*x, *y, *width, *height)),
            Roi::Ellipse {
                x,
                y,
                width,
                height,
            } => Some(ellipse_vertices(*x, *y, *width, *height, segments)),
            Roi::Polygon { vertices } => Some(vertices.clone()),
            Roi::Point { .. } | Roi::Polyline { .. } => None,
        }
    }

    /// Map the shape through an affine transform.
    ///
    /// Polygons stay polygons and polylines stay polylines. Rectangles and
    /// ellipses keep their kind under axis-aligned transforms and become
    /// polygons otherwise.
    pub fn transform(&self, t: &AffineTransform, segments: usize) -> Roi {
        match self {
            Roi::Point { x, y } => {
                let p = t.apply(Point::new(*x, *y));
                Roi::Point { x: p.x, y: p.y }
            }
            Roi::Polygon { vertices } => Roi::Polygon {
                vertices: vertices.iter().map(|p| t.apply(*p)).collect(),
            },
            Roi::Polyline { vertices } => Roi::Polyline {
                vertices: vertices.iter().map(|p| t.apply(*p)).collect(),
            },
            Roi::Rectangle {
                x,
                y,
                width,
                height,
            } => {
                if t.is_axis_aligned() {
                    let r = map_axis_aligned(t, *x, *y, *width, *height);
                    Roi::rectangle(r.x, r.y, r.width, r.height)
                } else {
                    Roi::Polygon {
                        vertices: rect_corners(*x, *y, *width, *height)
                            .into_iter()
                            .map(|p| t.apply(p))
                            .collect(),
                    }
                }
            }
            Roi::Ellipse {
                x,
                y,
                width,
                height,
            } => {
                if t.is_axis_aligned() {
                    let r = map_axis_aligned(t, *x, *y, *width, *height);
                    Roi::ellipse(r.x, r.y, r.width, r.height)
                } else {
                    Roi::Polygon {
                        vertices: ellipse_vertices(*x, *y, *width, *height, segments)
                            .into_iter()
                            .map(|p| t.apply(p))
                            .collect(),
                    }
                }
            }
        }
    }

    /// Check if a point is inside this shape.
    pub fn contains(&self, p: &Point) -> bool {
        match self {
            Roi::Point { .. } | Roi::Polyline { .. } => false,
            Roi::Rectangle {
                x,
                y,
                width,
                height,
            } => Rect::new(*x, *y, *width, *height).contains(p),
            Roi::Ellipse {
                x,
                y,
                width,
                height,
            } => {
                if *width <= 0.0 || *height <= 0.0 {
                    return false;
                }
                let rx = width / 2.0;
                let ry = height / 2.0;
                let dx = (p.x - (x + rx)) / rx;
                let dy = (p.y - (y + ry)) / ry;
                dx * dx + dy * dy <= 1.0
            }
            Roi::Polygon { vertices } => {
                // Point-in-polygon test using ray casting algorithm
                if vertices.len() < MIN_POLYGON_VERTICES {
                    return false;
                }
                let mut inside = false;
                let mut j = vertices.len() - 1;
                for i in 0..vertices.len() {
                    let vi = vertices[i];
                    let vj = vertices[j];
                    if ((vi.y > p.y) != (vj.y > p.y))
                        && (p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x)
                    {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
        }
    }
}

fn rect_corners(x: f64, y: f64, width: f64, height: f64) -> Vec<Point> {
    vec![
        Point::new(x, y),
        Point::new(x + width, y),
        Point::new(x + width, y + height),
        Point::new(x, y + height),
    ]
}

fn ellipse_vertices(x: f64, y: f64, width: f64, height: f64, segments: usize) -> Vec<Point> {
    let n = segments.max(MIN_POLYGON_VERTICES);
    let rx = width / 2.0;
    let ry = height / 2.0;
    let cx = x + rx;
    let cy = y + ry;
    (0..n)
        .map(|i| {
            let a = TAU * i as f64 / n as f64;
            Point::new(cx + rx * a.cos(), cy + ry * a.sin())
        })
        .collect()
}

/// Map an axis-aligned box, normalizing flipped axes.
fn map_axis_aligned(t: &AffineTransform, x: f64, y: f64, width: f64, height: f64) -> Rect {
    let a = t.apply(Point::new(x, y));
    let b = t.apply(Point::new(x + width, y + height));
    Rect::new(a.x.min(b.x), a.y.min(b.y), (b.x - a.x).abs(), (b.y - a.y).abs())
}
