//! Geo-projector behavior: the affine mapping with its north-up inversion,
//! ring closure, and mask contour extraction.

use geoscope_backend::{
    project_detections, project_mask, project_rects, DetectionSet, GeoBounds, PixelRect,
};
use image::{GrayImage, Luma};

const EPS: f64 = 1e-9;

fn close_to(a: [f64; 2], b: [f64; 2]) -> bool {
    (a[0] - b[0]).abs() < EPS && (a[1] - b[1]).abs() < EPS
}

fn bounds() -> GeoBounds {
    GeoBounds {
        min_lon: 10.0,
        min_lat: 20.0,
        max_lon: 11.0,
        max_lat: 21.0,
    }
}

#[test]
fn full_image_rect_round_trips_to_the_bounds_corners() {
    let rect = PixelRect {
        x1: 0.0,
        y1: 0.0,
        x2: 1000.0,
        y2: 1000.0,
    };
    let rings = project_rects(&[rect], 1000, 1000, &bounds()).unwrap();
    assert_eq!(rings.len(), 1);

    let ring = &rings[0];
    assert_eq!(ring.len(), 5);
    // Top-left is (min_lon, max_lat): pixel row 0 is north
    assert!(close_to(ring[0], [10.0, 21.0]));
    assert!(close_to(ring[1], [11.0, 21.0]));
    assert!(close_to(ring[2], [11.0, 20.0]));
    assert!(close_to(ring[3], [10.0, 20.0]));
    assert!(close_to(ring[4], ring[0]));
}

#[test]
fn known_rect_projects_to_the_expected_ring() {
    // Image bounds (10, 20, 11, 21), 1000x1000 pixels, rect (100,100,200,200)
    let rect = PixelRect {
        x1: 100.0,
        y1: 100.0,
        x2: 200.0,
        y2: 200.0,
    };
    let rings = project_rects(&[rect], 1000, 1000, &bounds()).unwrap();
    let ring = &rings[0];

    let expected = [
        [10.1, 20.9],
        [10.2, 20.9],
        [10.2, 20.8],
        [10.1, 20.8],
        [10.1, 20.9],
    ];
    assert_eq!(ring.len(), expected.len());
    for (got, want) in ring.iter().zip(expected.iter()) {
        assert!(
            close_to(*got, *want),
            "got {:?}, want {:?}",
            got,
            want
        );
    }
}

#[test]
fn every_emitted_ring_is_closed() {
    let rects = [
        PixelRect {
            x1: 10.0,
            y1: 10.0,
            x2: 40.0,
            y2: 30.0,
        },
        PixelRect {
            x1: 55.5,
            y1: 60.25,
            x2: 90.0,
            y2: 99.0,
        },
    ];
    for ring in project_rects(&rects, 100, 100, &bounds()).unwrap() {
        assert_eq!(ring.first(), ring.last());
    }

    let mut mask = GrayImage::new(32, 32);
    for y in 5..12 {
        for x in 8..20 {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }
    let rings = project_mask(&mask, &bounds()).unwrap();
    assert!(!rings.is_empty());
    for ring in rings {
        assert_eq!(ring.first(), ring.last());
    }
}

#[test]
fn single_blob_yields_one_ring_inside_its_geo_box() {
    let mut mask = GrayImage::new(100, 100);
    // Blob spanning pixels x 20..=39, y 30..=49
    for y in 30..50 {
        for x in 20..40 {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }

    let rings = project_mask(&mask, &bounds()).unwrap();
    assert_eq!(rings.len(), 1);

    // All vertices fall inside the blob's projected bounding box (inclusive
    // of boundary pixels)
    let lon_lo = 10.0 + 20.0 / 100.0;
    let lon_hi = 10.0 + 39.0 / 100.0;
    let lat_hi = 21.0 - 30.0 / 100.0;
    let lat_lo = 21.0 - 49.0 / 100.0;
    for [lon, lat] in &rings[0] {
        assert!(*lon >= lon_lo - EPS && *lon <= lon_hi + EPS, "lon {}", lon);
        assert!(*lat >= lat_lo - EPS && *lat <= lat_hi + EPS, "lat {}", lat);
    }
}

#[test]
fn two_blobs_yield_two_rings() {
    let mut mask = GrayImage::new(64, 64);
    for y in 4..12 {
        for x in 4..12 {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }
    for y in 40..52 {
        for x in 40..52 {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }

    let rings = project_mask(&mask, &bounds()).unwrap();
    assert_eq!(rings.len(), 2);
}

#[test]
fn empty_mask_contributes_no_polygons() {
    let mask = GrayImage::new(16, 16);
    let rings = project_mask(&mask, &bounds()).unwrap();
    assert!(rings.is_empty());
}

#[test]
fn interior_holes_are_not_emitted() {
    let mut mask = GrayImage::new(40, 40);
    // Filled square with a hole punched in the middle
    for y in 5..35 {
        for x in 5..35 {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }
    for y in 15..25 {
        for x in 15..25 {
            mask.put_pixel(x, y, Luma([0u8]));
        }
    }

    // External contour only: one ring, not two
    let rings = project_mask(&mask, &bounds()).unwrap();
    assert_eq!(rings.len(), 1);
}

#[test]
fn detection_set_orders_rects_before_masks() {
    let mut mask = GrayImage::new(100, 100);
    for y in 60..80 {
        for x in 60..80 {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }

    let detections = DetectionSet {
        width: 100,
        height: 100,
        rects: vec![PixelRect {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        }],
        masks: vec![mask],
    };

    let rings = project_detections(&detections, &bounds()).unwrap();
    assert_eq!(rings.len(), 2);
    // The rectangle ring comes first and has exactly five vertices
    assert_eq!(rings[0].len(), 5);
}

#[test]
fn zero_area_detection_set_fails_the_item() {
    let detections = DetectionSet {
        width: 0,
        height: 100,
        rects: vec![PixelRect {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
        }],
        masks: Vec::new(),
    };
    assert!(project_detections(&detections, &bounds()).is_err());
}
