//! Pixel-space → geographic-space projection.
//!
//! Turns a vision model's raster-space detections (axis-aligned rectangles or
//! binary masks) into geographic polygon rings, given the geographic bounding
//! box and pixel size of the image that was analyzed. Pure CPU work, no I/O.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

/// Axis-aligned rectangle in pixel coordinates, `(x1, y1)` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Closed ring of `[lon, lat]` pairs; first vertex equals the last.
pub type GeoPolygon = Vec<[f64; 2]>;

/// Raw output of one vision model invocation: detections in the pixel space
/// of the analyzed image, plus that image's pixel dimensions.
#[derive(Debug, Clone, Default)]
pub struct DetectionSet {
    pub width: u32,
    pub height: u32,
    pub rects: Vec<PixelRect>,
    pub masks: Vec<GrayImage>,
}

impl DetectionSet {
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty() && self.masks.is_empty()
    }
}

/// Map one pixel coordinate into geographic space.
///
/// Pixel row 0 is the image's north edge while `max_lat` is geographic
/// north, so latitude runs opposite to the pixel y axis.
fn pixel_to_geo(px: f64, py: f64, width: f64, height: f64, bounds: &GeoBounds) -> [f64; 2] {
    let lon = bounds.min_lon + (px / width) * (bounds.max_lon - bounds.min_lon);
    let lat = bounds.max_lat - (py / height) * (bounds.max_lat - bounds.min_lat);
    [lon, lat]
}

fn check_dims(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(AnalysisError::InvalidInput(format!(
            "zero-area image: {}x{}",
            width, height
        )));
    }
    Ok(())
}

/// Project rectangle detections into 5-point closed rings
/// (top-left, top-right, bottom-right, bottom-left, top-left).
pub fn project_rects(
    rects: &[PixelRect],
    width: u32,
    height: u32,
    bounds: &GeoBounds,
) -> Result<Vec<GeoPolygon>> {
    check_dims(width, height)?;
    let (w, h) = (width as f64, height as f64);

    Ok(rects
        .iter()
        .map(|rect| {
            vec![
                pixel_to_geo(rect.x1, rect.y1, w, h, bounds),
                pixel_to_geo(rect.x2, rect.y1, w, h, bounds),
                pixel_to_geo(rect.x2, rect.y2, w, h, bounds),
                pixel_to_geo(rect.x1, rect.y2, w, h, bounds),
                pixel_to_geo(rect.x1, rect.y1, w, h, bounds),
            ]
        })
        .collect())
}

/// Project one binary mask into zero or more closed rings, one per external
/// contour. Interior holes are not emitted; a fully-empty mask contributes
/// nothing.
pub fn project_mask(mask: &GrayImage, bounds: &GeoBounds) -> Result<Vec<GeoPolygon>> {
    check_dims(mask.width(), mask.height())?;
    let (w, h) = (mask.width() as f64, mask.height() as f64);

    let rings = find_contours::<i32>(mask)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .map(|contour| {
            let mut ring: GeoPolygon = contour
                .points
                .iter()
                .map(|point| pixel_to_geo(point.x as f64, point.y as f64, w, h, bounds))
                .collect();
            // Contour tracing does not repeat the start vertex
            if ring.first() != ring.last() {
                if let Some(first) = ring.first().copied() {
                    ring.push(first);
                }
            }
            ring
        })
        .filter(|ring| !ring.is_empty())
        .collect();

    Ok(rings)
}

/// Project a full detection set against the analyzed image's geographic
/// bounding box. Rectangle rings come first, then mask contours, each group
/// in detection order.
pub fn project_detections(detections: &DetectionSet, bounds: &GeoBounds) -> Result<Vec<GeoPolygon>> {
    let mut polygons = if detections.rects.is_empty() {
        Vec::new()
    } else {
        project_rects(&detections.rects, detections.width, detections.height, bounds)?
    };

    for mask in &detections.masks {
        polygons.extend(project_mask(mask, bounds)?);
    }

    Ok(polygons)
}
