use image::{ imageops, imageops::FilterType, RgbImage };
use log::{ debug, info, warn };

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::DetectionConfig;
use crate::error::{ LprError, LprErrorKind };

/// One located plate box in original-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl Detection {

    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Self {
        Self { x1, y1, x2, y2, confidence }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_degenerate(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Map a box found on an image resized by `factor` back to the original image.
    /// Coordinates are truncated toward zero.
    pub fn unscale(&self, factor: f32) -> Self {
        let back = |v: i32| (v as f32 / factor) as i32;
        Self {
            x1: back(self.x1),
            y1: back(self.y1),
            x2: back(self.x2),
            y2: back(self.y2),
            confidence: self.confidence,
        }
    }

    /// Coarse spatial key shared by boxes of the same object seen at different scales.
    pub fn bucket(&self, tolerance: i32) -> (i32, i32, i32, i32) {
        (
            self.x1.div_euclid(tolerance),
            self.y1.div_euclid(tolerance),
            self.x2.div_euclid(tolerance),
            self.y2.div_euclid(tolerance),
        )
    }

    /// Expand by `margin` and clamp to a `width` x `height` image.
    /// Returns x, y, width, height of the crop.
    pub fn crop_rect(&self, margin: i32, width: u32, height: u32) -> Result<[u32; 4], LprError> {
        let x1 = (self.x1 - margin).max(0);
        let y1 = (self.y1 - margin).max(0);
        let x2 = (self.x2 + margin).min(width as i32);
        let y2 = (self.y2 + margin).min(height as i32);
        if x2 <= x1 || y2 <= y1 {
            return Err(LprErrorKind::EmptyCrop { x1, y1, x2, y2 }.into());
        }
        Ok([x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32])
    }
}

/// A plate detector model.
pub trait Detector {
    /// Boxes in `image` coordinates whose confidence is at least `confidence`.
    fn detect(&self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>, LprError>;
}

impl<D: Detector + ?Sized> Detector for &D {
    fn detect(&self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>, LprError> {
        (**self).detect(image, confidence)
    }
}

/// Run `detector` at every configured scale and merge the results.
///
/// Boxes are mapped back to `image` coordinates and grouped by `Detection::bucket`.
/// Each bucket keeps the most confident box; an equally confident box found later
/// does not replace it. The result is sorted by confidence, highest first.
pub fn detect_multi_scale<D: Detector>(
    detector: &D,
    image: &RgbImage,
    config: &DetectionConfig,
) -> Result<Vec<Detection>, LprError> {
    let (width, height) = image.dimensions();
    let mut buckets: BTreeMap<(i32, i32, i32, i32), Detection> = BTreeMap::new();

    for &factor in &config.scales {
        let found = if (factor - 1.0).abs() < f32::EPSILON {
            detector.detect(image, config.confidence)?
        } else {
            let new_width = (width as f32 * factor).round() as u32;
            let new_height = (height as f32 * factor).round() as u32;
            if new_width == 0 || new_height == 0 {
                warn!("scale {} shrinks {}x{} to nothing, skipping", factor, width, height);
                continue;
            }
            let resized = imageops::resize(image, new_width, new_height, FilterType::CatmullRom);
            detector.detect(&resized, config.confidence)?
        };
        debug!("scale {}: {} raw detections", factor, found.len());

        for det in found.into_iter().filter_map(checked_confidence) {
            let det = det.unscale(factor);
            let key = det.bucket(config.bucket_tolerance);
            match buckets.get(&key) {
                Some(best) if best.confidence >= det.confidence => {}
                _ => {
                    buckets.insert(key, det);
                }
            }
        }
    }

    let mut merged: Vec<Detection> = buckets.into_iter().map(|(_, det)| det).collect();
    sort_by_confidence(&mut merged);
    info!("{} detections after merging {} scales", merged.len(), config.scales.len());
    Ok(merged)
}

/// Multi-scale detection, falling back to one unscaled pass at
/// `fallback_confidence` when no scale produced anything.
pub fn detect_with_fallback<D: Detector>(
    detector: &D,
    image: &RgbImage,
    config: &DetectionConfig,
) -> Result<Vec<Detection>, LprError> {
    let merged = detect_multi_scale(detector, image, config)?;
    if !merged.is_empty() {
        return Ok(merged);
    }
    info!("no detections at any scale, retrying unscaled at {}", config.fallback_confidence);
    let mut fallback: Vec<Detection> = detector
        .detect(image, config.fallback_confidence)?
        .into_iter()
        .filter_map(checked_confidence)
        .collect();
    sort_by_confidence(&mut fallback);
    Ok(fallback)
}

/// Drop a box whose confidence is not a number; clamp the rest into [0, 1].
fn checked_confidence(det: Detection) -> Option<Detection> {
    if !det.confidence.is_finite() {
        warn!("dropping detection with confidence {}", det.confidence);
        return None;
    }
    Some(Detection { confidence: det.confidence.max(0.0).min(1.0), ..det })
}

pub fn sort_by_confidence(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| (a.y1, a.x1, a.y2, a.x2).cmp(&(b.y1, b.x1, b.y2, b.x2)))
    });
}


#[cfg(test)]
pub(crate) mod test {

    use image::RgbImage;

    use std::cell::RefCell;
    use std::error::Error;

    use crate::config::DetectionConfig;
    use crate::error::{ LprError, LprErrorKind };
    use super::{ detect_multi_scale, detect_with_fallback, Detection, Detector };

    /// Reports fixed boxes (given in original coordinates) scaled to whatever
    /// image it is handed, with a per-scale confidence.
    pub(crate) struct ScaledDetector {
        pub original_width: u32,
        pub boxes: Vec<[i32; 4]>,
        pub confidence_at: fn(f32) -> f32,
        pub calls: RefCell<Vec<f32>>,
    }

    impl Detector for ScaledDetector {
        fn detect(&self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>, LprError> {
            self.calls.borrow_mut().push(confidence);
            let factor = image.width() as f32 / self.original_width as f32;
            let score = (self.confidence_at)(factor);
            if score < confidence {
                return Ok(Vec::new());
            }
            Ok(self.boxes.iter().map(|b| {
                let s = |v: i32| (v as f32 * factor) as i32;
                Detection::new(s(b[0]), s(b[1]), s(b[2]), s(b[3]), score)
            }).collect())
        }
    }

    struct Silent;

    impl Detector for Silent {
        fn detect(&self, _: &RgbImage, _: f32) -> Result<Vec<Detection>, LprError> {
            Ok(Vec::new())
        }
    }

    struct Broken;

    impl Detector for Broken {
        fn detect(&self, _: &RgbImage, _: f32) -> Result<Vec<Detection>, LprError> {
            Err(LprError::config("model exploded"))
        }
    }

    #[test]
    fn unscale_truncates() {
        let det = Detection::new(150, 75, 301, 151, 0.5).unscale(1.5);
        assert_eq!((det.x1, det.y1, det.x2, det.y2), (100, 50, 200, 100));
        let det = Detection::new(50, 25, 101, 51, 0.5).unscale(0.5);
        assert_eq!((det.x1, det.y1, det.x2, det.y2), (100, 50, 202, 102));
    }

    #[test]
    fn near_boxes_share_bucket() {
        let a = Detection::new(100, 40, 200, 80, 0.5);
        let b = Detection::new(105, 45, 210, 85, 0.9);
        assert_eq!(a.bucket(20), b.bucket(20));
        let c = Detection::new(125, 45, 210, 85, 0.9);
        assert_ne!(a.bucket(20), c.bucket(20));
    }

    #[test]
    fn merges_scales_keeping_best_confidence() -> Result<(), Box<dyn Error>> {
        let detector = ScaledDetector {
            original_width: 400,
            boxes: vec![[100, 40, 200, 80]],
            confidence_at: |f| if (f - 2.0).abs() < 1e-3 { 0.9 } else { 0.4 },
            calls: RefCell::new(Vec::new()),
        };
        let image = RgbImage::new(400, 200);
        let config = DetectionConfig::default();
        let merged = detect_multi_scale(&detector, &image, &config)?;
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(merged[0].x1 / 20, 5);
        assert_eq!(detector.calls.borrow().len(), config.scales.len());
        Ok(())
    }

    #[test]
    fn equal_confidence_keeps_first_seen() -> Result<(), Box<dyn Error>> {
        let detector = ScaledDetector {
            original_width: 400,
            boxes: vec![[101, 41, 199, 79]],
            confidence_at: |_| 0.6,
            calls: RefCell::new(Vec::new()),
        };
        let image = RgbImage::new(400, 200);
        let merged = detect_multi_scale(&detector, &image, &DetectionConfig::default())?;
        assert_eq!(merged.len(), 1);
        // the 1.0 pass runs first and reports the box unchanged
        assert_eq!((merged[0].x1, merged[0].y1, merged[0].x2, merged[0].y2), (101, 41, 199, 79));
        Ok(())
    }

    #[test]
    fn distinct_plates_sorted_by_confidence() -> Result<(), Box<dyn Error>> {
        struct Two;
        impl Detector for Two {
            fn detect(&self, image: &RgbImage, _: f32) -> Result<Vec<Detection>, LprError> {
                if image.width() != 400 {
                    return Ok(Vec::new());
                }
                Ok(vec![
                    Detection::new(10, 10, 90, 40, 0.3),
                    Detection::new(200, 100, 300, 140, 0.8),
                ])
            }
        }
        let image = RgbImage::new(400, 200);
        let merged = detect_multi_scale(&Two, &image, &DetectionConfig::default())?;
        assert_eq!(merged.len(), 2);
        assert!(merged[0].confidence > merged[1].confidence);
        assert_eq!(merged[0].x1, 200);
        Ok(())
    }

    #[test]
    fn fallback_runs_unscaled_at_fallback_threshold() -> Result<(), Box<dyn Error>> {
        let detector = ScaledDetector {
            original_width: 400,
            boxes: vec![[100, 40, 200, 80]],
            confidence_at: |_| 0.1,
            calls: RefCell::new(Vec::new()),
        };
        let image = RgbImage::new(400, 200);
        let config = DetectionConfig::default();
        let found = detect_with_fallback(&detector, &image, &config)?;
        assert!(found.is_empty());
        let calls = detector.calls.borrow();
        assert_eq!(calls.len(), config.scales.len() + 1);
        assert_eq!(calls.last().copied(), Some(config.fallback_confidence));
        Ok(())
    }

    #[test]
    fn nothing_found_is_not_an_error() -> Result<(), Box<dyn Error>> {
        let image = RgbImage::new(64, 32);
        let found = detect_with_fallback(&Silent, &image, &DetectionConfig::default())?;
        assert!(found.is_empty());
        Ok(())
    }

    #[test]
    fn nan_confidence_never_replaces_a_better_box() -> Result<(), Box<dyn Error>> {
        let detector = ScaledDetector {
            original_width: 400,
            boxes: vec![[100, 40, 200, 80]],
            confidence_at: |f| {
                if (f - 1.0).abs() < 1e-3 {
                    0.9
                } else if (f - 1.5).abs() < 1e-3 {
                    f32::NAN
                } else {
                    0.1
                }
            },
            calls: RefCell::new(Vec::new()),
        };
        let mut config = DetectionConfig::default();
        config.confidence = 0.0;
        let merged = detect_multi_scale(&detector, &RgbImage::new(400, 200), &config)?;
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.9).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn out_of_range_confidence_is_clamped() -> Result<(), Box<dyn Error>> {
        let detector = ScaledDetector {
            original_width: 400,
            boxes: vec![[100, 40, 200, 80]],
            confidence_at: |_| 1.7,
            calls: RefCell::new(Vec::new()),
        };
        let image = RgbImage::new(400, 200);
        let merged = detect_multi_scale(&detector, &image, &DetectionConfig::default())?;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 1.0);
        Ok(())
    }

    #[test]
    fn fallback_drops_nan_and_sorts() -> Result<(), Box<dyn Error>> {
        struct LateOnly;
        impl Detector for LateOnly {
            fn detect(&self, _: &RgbImage, confidence: f32) -> Result<Vec<Detection>, LprError> {
                if confidence < 0.5 {
                    return Ok(Vec::new());
                }
                Ok(vec![
                    Detection::new(10, 10, 90, 40, 0.55),
                    Detection::new(200, 100, 300, 140, f32::NAN),
                    Detection::new(120, 20, 180, 50, 0.95),
                ])
            }
        }
        let image = RgbImage::new(400, 200);
        let found = detect_with_fallback(&LateOnly, &image, &DetectionConfig::default())?;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].x1, 120);
        assert_eq!(found[1].x1, 10);
        Ok(())
    }

    #[test]
    fn scale_to_nothing_is_skipped() -> Result<(), Box<dyn Error>> {
        let detector = ScaledDetector {
            original_width: 1,
            boxes: vec![[0, 0, 1, 1]],
            confidence_at: |_| 0.9,
            calls: RefCell::new(Vec::new()),
        };
        let mut config = DetectionConfig::default();
        config.scales = vec![1.0, 0.1];
        let merged = detect_multi_scale(&detector, &RgbImage::new(1, 1), &config)?;
        assert_eq!(detector.calls.borrow().len(), 1);
        assert_eq!(merged.len(), 1);
        Ok(())
    }

    #[test]
    fn negative_coordinates_bucket_by_floor() {
        let a = Detection::new(-5, 0, 30, 20, 0.5);
        let b = Detection::new(-25, 0, 30, 20, 0.5);
        assert_eq!(a.bucket(20).0, -1);
        assert_eq!(b.bucket(20).0, -2);
        assert_ne!(a.bucket(20), b.bucket(20));
    }

    #[test]
    fn detector_errors_propagate() {
        let image = RgbImage::new(64, 32);
        assert!(detect_multi_scale(&Broken, &image, &DetectionConfig::default()).is_err());
    }

    #[test]
    fn crop_rect_expands_and_clamps() -> Result<(), Box<dyn Error>> {
        let det = Detection::new(2, 3, 50, 20, 0.9);
        assert_eq!(det.crop_rect(5, 52, 100)?, [0, 0, 52, 25]);
        Ok(())
    }

    #[test]
    fn crop_rect_outside_image_is_empty() {
        let det = Detection::new(120, 10, 160, 30, 0.9);
        let err = det.crop_rect(5, 100, 100).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::EmptyCrop { .. }));

        let flipped = Detection::new(50, 10, 30, 30, 0.9);
        assert!(flipped.crop_rect(5, 100, 100).is_err());
    }
}
