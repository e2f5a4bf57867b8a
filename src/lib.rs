use image::{ imageops, DynamicImage };
use log::{ info, warn };

use std::path::Path;

use error::{ LprError, LprErrorKind };

pub mod annotate;
pub mod config;
pub mod detection;
pub mod error;
pub mod heatmap;
pub mod image_process;
pub mod ocr;
pub mod report;
#[cfg(feature = "tf-models")]
pub mod tf;
pub mod utils;

pub use annotate::Annotator;
pub use config::Config;
pub use detection::{ Detection, Detector };
pub use ocr::{ Recognizer, NO_TEXT };
pub use report::{ PlateResult, Report };


/// Open an image, telling a missing file apart from an undecodable one.
pub fn load_image(path: impl AsRef<Path>) -> Result<DynamicImage, LprError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(LprErrorKind::MissingImage(path.to_path_buf()).into());
    }
    image::open(path).map_err(|e| LprErrorKind::UnreadableImage(path.to_path_buf(), e).into())
}

/// Plate detection and reading over one still image.
pub struct Lpr<D, R> {
    detector: D,
    recognizer: R,
    config: Config,
    annotator: Annotator,
}

impl<D: Detector, R: Recognizer> Lpr<D, R> {

    pub fn new(detector: D, recognizer: R, config: Config) -> Result<Self, LprError> {
        config.validate()?;
        Ok(Lpr { detector, recognizer, config, annotator: Annotator::default() })
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Recognize one image
    ///
    /// Detector failures abort the run. Detections whose crop comes out empty
    /// are skipped and recognizer failures only cost votes, so one bad plate
    /// never loses the others.
    pub fn recognize(&self, img: &DynamicImage) -> Result<Report, LprError> {
        let config = &self.config;
        let original = img.to_rgb8();
        let (width, height) = original.dimensions();
        info!("processing {}x{} image", width, height);

        let enhanced = if config.enhance.enabled {
            Some(image_process::enhance(&DynamicImage::ImageRgb8(original.clone()), &config.enhance)?)
        } else {
            None
        };
        let frame = enhanced.as_ref().unwrap_or(&original);

        let detections = detection::detect_with_fallback(&self.detector, frame, &config.detection)?;
        if detections.is_empty() {
            info!("no plates detected");
            return Ok(Report {
                annotated: original,
                detections,
                plates: Vec::new(),
                enhanced,
                heatmap: None,
            });
        }
        info!("{} plate(s) detected", detections.len());

        let mut annotated = original.clone();
        let mut plates = Vec::with_capacity(detections.len());
        for (index, det) in detections.iter().enumerate() {
            let crop_rect = match det.crop_rect(config.detection.crop_margin, width, height) {
                Ok(rect) => rect,
                Err(e) => {
                    warn!("skipping detection {}: {}", index, e);
                    continue;
                }
            };
            let [x, y, w, h] = crop_rect;
            let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
            let ocr = ocr::read_plate(&self.recognizer, &crop, &config.ocr);
            let plate = PlateResult { index, detection: *det, crop_rect, crop, ocr };
            info!("plate {}: {} ({} votes)", index, plate.label(), plate.ocr.votes);
            self.annotator.draw(&mut annotated, crop_rect, &plate.label());
            plates.push(plate);
        }

        let heatmap = if config.heatmap.enabled {
            Some(heatmap::build(&original, &detections, &config.heatmap))
        } else {
            None
        };

        info!("plates found: {}", plates.iter().map(|p| p.ocr.label()).collect::<Vec<_>>().join(", "));
        Ok(Report { annotated, detections, plates, enhanced, heatmap })
    }
}
