use image::RgbImage;
use log::info;

use std::fs;
use std::path::{ Path, PathBuf };

use crate::detection::Detection;
use crate::error::LprError;
use crate::heatmap::Heatmap;
use crate::ocr::OcrOutcome;

/// One detection that made it through cropping and OCR.
pub struct PlateResult {
    pub index: usize,
    pub detection: Detection,
    /// crop actually read, as x, y, width, height
    pub crop_rect: [u32; 4],
    pub crop: RgbImage,
    pub ocr: OcrOutcome,
}

impl PlateResult {
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.ocr.label(), self.detection.confidence)
    }
}

pub struct Report {
    /// source image with boxes and labels; untouched when nothing was detected
    pub annotated: RgbImage,
    pub detections: Vec<Detection>,
    pub plates: Vec<PlateResult>,
    pub enhanced: Option<RgbImage>,
    pub heatmap: Option<Heatmap>,
}

impl Report {

    pub fn has_detections(&self) -> bool {
        !self.detections.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.plates.iter().map(|p| p.ocr.label()).collect()
    }

    /// Write the result into `dir`; with `debug` also every crop, the enhanced
    /// frame and each OCR variant. With no detections only
    /// `result_no_plate.jpg` is written.
    pub fn save(&self, dir: impl AsRef<Path>, debug: bool) -> Result<Vec<PathBuf>, LprError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        let mut write = |name: String, image: &RgbImage| -> Result<(), LprError> {
            let path = dir.join(name);
            image.save(&path)?;
            written.push(path);
            Ok(())
        };

        if !self.has_detections() {
            write("result_no_plate.jpg".to_string(), &self.annotated)?;
            info!("no plates, wrote {}", dir.join("result_no_plate.jpg").display());
            return Ok(written);
        }

        write("result.jpg".to_string(), &self.annotated)?;
        if let Some(heatmap) = &self.heatmap {
            write("heatmap_overlay.jpg".to_string(), &heatmap.overlay)?;
            write("heatmap.jpg".to_string(), &heatmap.colored)?;
        }
        if debug {
            if let Some(enhanced) = &self.enhanced {
                write("enhanced.jpg".to_string(), enhanced)?;
            }
            for plate in &self.plates {
                write(format!("plate_{}.jpg", plate.index), &plate.crop)?;
            }
            for plate in &self.plates {
                for (variant, image) in &plate.ocr.variants {
                    let path = dir.join(format!("plate_{}_ocr_{}.png", plate.index, variant.name()));
                    image.save(&path)?;
                    written.push(path);
                }
            }
        }
        info!("wrote {} files to {}", written.len(), dir.display());
        Ok(written)
    }
}


#[cfg(test)]
mod test {

    use image::{ GrayImage, Rgb, RgbImage };

    use std::error::Error;

    use crate::detection::Detection;
    use crate::ocr::{ OcrOutcome, Variant };
    use super::{ PlateResult, Report };

    fn plate() -> PlateResult {
        PlateResult {
            index: 0,
            detection: Detection::new(2, 2, 20, 10, 0.87),
            crop_rect: [0, 0, 25, 15],
            crop: RgbImage::new(25, 15),
            ocr: OcrOutcome {
                text: Some("ABC1234".to_string()),
                votes: 3,
                variants: Variant::ALL.iter().map(|v| (*v, GrayImage::new(25, 15))).collect(),
            },
        }
    }

    #[test]
    fn label_has_text_and_confidence() {
        assert_eq!(plate().label(), "ABC1234 0.87");
    }

    #[test]
    fn no_detection_writes_only_plain_result() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let report = Report {
            annotated: RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])),
            detections: Vec::new(),
            plates: Vec::new(),
            enhanced: Some(RgbImage::new(8, 8)),
            heatmap: None,
        };
        let written = report.save(dir.path(), true)?;
        assert_eq!(written, vec![dir.path().join("result_no_plate.jpg")]);
        Ok(())
    }

    #[test]
    fn debug_writes_crops_and_variants() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let report = Report {
            annotated: RgbImage::new(30, 20),
            detections: vec![Detection::new(2, 2, 20, 10, 0.87)],
            plates: vec![plate()],
            enhanced: Some(RgbImage::new(30, 20)),
            heatmap: None,
        };
        let quiet = report.save(dir.path(), false)?;
        assert_eq!(quiet.len(), 1);

        let written = report.save(dir.path(), true)?;
        // result, enhanced, crop, five variants
        assert_eq!(written.len(), 8);
        assert!(dir.path().join("plate_0_ocr_morph_inv.png").exists());
        assert!(dir.path().join("plate_0.jpg").exists());
        Ok(())
    }
}
