//! Spatial region descriptors and their rasterisation to pixel masks.
//!
//! Pixel `(x, y)` is covered by a shape when its centre, taken at the integer
//! coordinate `(x, y)`, lies inside (boundary included).

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum RegionShape {
    Circle { x: f64, y: f64, radius: f64 },
    /// Axis-aligned box with inclusive corners.
    Box { x0: f64, y0: f64, x1: f64, y1: f64 },
    Polygon { vertices: Vec<(f64, f64)> },
}

impl RegionShape {
    pub fn validate(&self) -> Result<(), FitError> {
        match self {
            RegionShape::Circle { radius, .. } if !(radius.is_finite() && *radius >= 0.0) => {
                Err(FitError::validation(format!("circle radius must be >= 0, got {radius}")))
            }
            RegionShape::Polygon { vertices } if vertices.len() < 3 => Err(FitError::validation(
                format!("polygon needs at least 3 vertices, got {}", vertices.len()),
            )),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        match self {
            RegionShape::Circle { x, y, radius } => {
                let (dx, dy) = (px - x, py - y);
                dx * dx + dy * dy <= radius * radius
            }
            RegionShape::Box { x0, y0, x1, y1 } => {
                px >= x0.min(*x1) && px <= x0.max(*x1) && py >= y0.min(*y1) && py <= y0.max(*y1)
            }
            RegionShape::Polygon { vertices } => polygon_contains(vertices, px, py),
        }
    }

    /// Parse the CLI forms `circle:x,y,r`, `box:x0,y0,x1,y1` and
    /// `polygon:x1,y1,x2,y2,...`.
    pub fn parse(text: &str) -> Result<Self, FitError> {
        let (kind, rest) = text
            .split_once(':')
            .ok_or_else(|| FitError::validation(format!("region '{text}' must look like kind:numbers")))?;
        let numbers = rest
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FitError::validation(format!("region '{text}': {e}")))?;

        let shape = match (kind.trim().to_ascii_lowercase().as_str(), numbers.as_slice()) {
            ("circle", &[x, y, radius]) => RegionShape::Circle { x, y, radius },
            ("box", &[x0, y0, x1, y1]) => RegionShape::Box { x0, y0, x1, y1 },
            ("polygon", coords) if coords.len() % 2 == 0 => RegionShape::Polygon {
                vertices: coords.chunks(2).map(|c| (c[0], c[1])).collect(),
            },
            _ => {
                return Err(FitError::validation(format!(
                    "region '{text}' is not circle:x,y,r, box:x0,y0,x1,y1 or polygon:x1,y1,..."
                )));
            }
        };
        shape.validate()?;
        Ok(shape)
    }
}

/// Even-odd ray casting, with points on an edge counted as inside.
fn polygon_contains(vertices: &[(f64, f64)], px: f64, py: f64) -> bool {
    let n = vertices.len();
    let mut inside = false;
    for i in 0..n {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[(i + n - 1) % n];

        let cross = (xj - xi) * (py - yi) - (yj - yi) * (px - xi);
        let within = px >= xi.min(xj) && px <= xi.max(xj) && py >= yi.min(yj) && py <= yi.max(yj);
        if cross.abs() < 1e-12 && within {
            return true;
        }

        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
    }
    inside
}

/// Union of `shapes` over an `nx × ny` grid.
pub fn rasterize(shapes: &[RegionShape], shape: (usize, usize)) -> Result<DMatrix<bool>, FitError> {
    for s in shapes {
        s.validate()?;
    }
    Ok(DMatrix::from_fn(shape.0, shape.1, |x, y| {
        shapes.iter().any(|s| s.contains(x as f64, y as f64))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_mask() {
        let mask = rasterize(
            &[RegionShape::Circle {
                x: 2.0,
                y: 2.0,
                radius: 1.0,
            }],
            (5, 5),
        )
        .unwrap();
        assert_eq!(mask.iter().filter(|m| **m).count(), 5);
        assert!(mask[(2, 2)] && mask[(1, 2)] && mask[(2, 3)]);
        assert!(!mask[(1, 1)]);
    }

    #[test]
    fn union_of_box_and_polygon() {
        let shapes = vec![
            RegionShape::Box {
                x0: 0.0,
                y0: 0.0,
                x1: 1.0,
                y1: 1.0,
            },
            RegionShape::Polygon {
                vertices: vec![(3.0, 3.0), (5.0, 3.0), (5.0, 5.0), (3.0, 5.0)],
            },
        ];
        let mask = rasterize(&shapes, (6, 6)).unwrap();
        assert_eq!(mask.iter().filter(|m| **m).count(), 4 + 9);
        assert!(mask[(0, 0)] && mask[(4, 4)] && mask[(5, 5)]);
        assert!(!mask[(2, 2)]);
    }

    #[test]
    fn triangle_interior() {
        let tri = RegionShape::Polygon {
            vertices: vec![(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)],
        };
        assert!(tri.contains(1.0, 1.0));
        assert!(tri.contains(2.0, 2.0));
        assert!(!tri.contains(3.0, 3.0));
    }

    #[test]
    fn parse_cli_forms() {
        assert_eq!(
            RegionShape::parse("circle:10,12,3.5").unwrap(),
            RegionShape::Circle {
                x: 10.0,
                y: 12.0,
                radius: 3.5
            }
        );
        assert!(matches!(RegionShape::parse("box:0,0,4,4").unwrap(), RegionShape::Box { .. }));
        assert!(matches!(
            RegionShape::parse("polygon:0,0,4,0,0,4").unwrap(),
            RegionShape::Polygon { .. }
        ));
        assert!(RegionShape::parse("circle:1,2").is_err());
        assert!(RegionShape::parse("polygon:0,0,1,1").is_err());
        assert!(RegionShape::parse("ellipse:1,2,3").is_err());
        assert!(RegionShape::parse("circle:1,2,-1").is_err());
    }
}
