//! Synthetic brightfield TMA slides.
//!
//! Generates a grid of cores on a bright background. Each core carries a few
//! annotations, and the dark "tissue" painted into the image is the
//! annotation geometry moved by a known per-core transform, so alignment has
//! a ground truth to recover.

use image::{DynamicImage, Rgb, RgbImage};

use crate::data::{InMemoryImageServer, PixelCalibration};
use crate::geometry::{AffineTransform, Point};
use crate::model::{ObjectHierarchy, ObjectId, Roi};

/// Slide background, close to a typical brightfield glass colour.
pub const BACKGROUND: [u8; 3] = [236, 232, 238];

/// Hematoxylin-like stain colour used for tissue.
pub const TISSUE: [u8; 3] = [96, 62, 128];

/// Layout of a synthetic TMA slide.
#[derive(Debug, Clone)]
pub struct SlideLayout {
    pub rows: u32,
    pub cols: u32,
    /// Core diameter in pixels
    pub core_diameter: f64,
    /// Gap between neighbouring cores in pixels
    pub spacing: f64,
    pub pixel_size_microns: f64,
    /// Tissue displacement relative to the annotations
    pub tissue_shift: (f64, f64),
    /// Tissue rotation about the core centre, radians
    pub tissue_rotation: f64,
    /// Grid cells (row, col) without tissue
    pub missing: Vec<(u32, u32)>,
}

impl Default for SlideLayout {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 3,
            core_diameter: 320.0,
            spacing: 80.0,
            pixel_size_microns: 1.0,
            tissue_shift: (12.0, -8.0),
            tissue_rotation: 0.0,
            missing: Vec::new(),
        }
    }
}

impl SlideLayout {
    pub fn image_size(&self) -> (u32, u32) {
        let pitch = self.core_diameter + self.spacing;
        let w = f64::from(self.cols) * pitch + self.spacing;
        let h = f64::from(self.rows) * pitch + self.spacing;
        (w.ceil() as u32, h.ceil() as u32)
    }

    fn core_origin(&self, row: u32, col: u32) -> Point {
        let pitch = self.core_diameter + self.spacing;
        Point::new(
            self.spacing + f64::from(col) * pitch,
            self.spacing + f64::from(row) * pitch,
        )
    }

    /// Where tissue really sits for annotations of the core centred at `center`.
    pub fn tissue_transform(&self, center: Point) -> AffineTransform {
        AffineTransform::translation(-center.x, -center.y)
            .then(&AffineTransform::euclidean(self.tissue_rotation, 0.0, 0.0))
            .then(&AffineTransform::translation(
                center.x + self.tissue_shift.0,
                center.y + self.tissue_shift.1,
            ))
    }
}

/// A generated slide together with the objects drawn on it.
pub struct SyntheticSlide {
    pub image: DynamicImage,
    pub calibration: PixelCalibration,
    pub hierarchy: ObjectHierarchy,
    /// For every core with tissue, the transform that maps its annotations
    /// onto the painted tissue.
    pub ground_truth: Vec<(ObjectId, AffineTransform)>,
}

impl SyntheticSlide {
    pub fn server(&self) -> InMemoryImageServer {
        InMemoryImageServer::new(self.image.clone(), self.calibration)
    }
}

/// Annotations of one core, relative to its centre and scaled to its radius.
///
/// The shapes are deliberately asymmetric so rotation and translation are
/// both observable.
pub fn core_annotations(center: Point, radius: f64) -> Vec<Roi> {
    let r = radius;
    let at = |dx: f64, dy: f64| (center.x + dx * r, center.y + dy * r);
    vec![
        Roi::polygon([
            at(-0.55, -0.45),
            at(0.35, -0.45),
            at(0.35, -0.1),
            at(-0.15, -0.1),
            at(-0.15, 0.5),
            at(-0.55, 0.5),
        ]),
        Roi::ellipse(
            center.x + 0.05 * r,
            center.y + 0.1 * r,
            0.45 * r,
            0.3 * r,
        ),
    ]
}

/// Generate a slide for `layout`.
pub fn tma_slide(layout: &SlideLayout) -> SyntheticSlide {
    let (width, height) = layout.image_size();
    let mut canvas = RgbImage::from_pixel(width, height, Rgb(BACKGROUND));
    let mut hierarchy = ObjectHierarchy::new();
    let mut ground_truth = Vec::new();
    let radius = layout.core_diameter / 2.0;

    for row in 0..layout.rows {
        for col in 0..layout.cols {
            let origin = layout.core_origin(row, col);
            let core_roi = Roi::ellipse(
                origin.x,
                origin.y,
                layout.core_diameter,
                layout.core_diameter,
            );
            let name = format!("{}-{}", char::from(b'A' + (row % 26) as u8), col + 1);
            // A fresh hierarchy allocates ids from 1, so this cannot run out
            let Ok(core) = hierarchy.add_tma_core(name, core_roi) else {
                continue;
            };
            let center = Point::new(origin.x + radius, origin.y + radius);

            if layout.missing.contains(&(row, col)) {
                // Ids are allocated sequentially, so `core` always exists here
                let _ = hierarchy.set_missing(core, true);
                continue;
            }

            let truth = layout.tissue_transform(center);
            for roi in core_annotations(center, radius) {
                paint_roi(&mut canvas, &roi.transform(&truth, 128), TISSUE);
                // `core` was just added, so the parent lookup cannot fail
                let _ = hierarchy.add_annotation(Some(core), roi, Some("Tumor".to_string()));
            }
            ground_truth.push((core, truth));
        }
    }

    log::debug!(
        "Generated {}x{} synthetic slide with {} cores",
        width,
        height,
        layout.rows * layout.cols
    );

    SyntheticSlide {
        image: DynamicImage::ImageRgb8(canvas),
        calibration: PixelCalibration::microns(layout.pixel_size_microns),
        hierarchy,
        ground_truth,
    }
}

/// Paint every pixel whose centre lies inside `roi`.
pub fn paint_roi(canvas: &mut RgbImage, roi: &Roi, color: [u8; 3]) {
    let Some(bounds) = roi.bounds() else {
        return;
    };
    let (w, h) = canvas.dimensions();
    let x0 = bounds.x.floor().max(0.0) as u32;
    let y0 = bounds.y.floor().max(0.0) as u32;
    let x1 = (bounds.max_x().ceil().max(0.0) as u32).min(w);
    let y1 = (bounds.max_y().ceil().max(0.0) as u32).min(h);
    for y in y0..y1 {
        for x in x0..x1 {
            let centre = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
            if roi.contains(&centre) {
                canvas.put_pixel(x, y, Rgb(color));
            }
        }
    }
}
