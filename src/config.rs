use crate::error::LprError;

/// Scale factors tried by the multi-scale detector, in order.
pub const DEFAULT_SCALES: [f32; 5] = [1.0, 1.5, 2.0, 0.75, 0.5];

/// Characters a plate can contain.
pub const PLATE_ALLOWLIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    /// confidence floor for every multi-scale pass
    pub confidence: f32,
    /// confidence used by the single unscaled pass when no scale found anything
    pub fallback_confidence: f32,
    pub scales: Vec<f32>,
    /// pixel tolerance used to quantize boxes into buckets
    pub bucket_tolerance: i32,
    /// pixels added around each box before cropping
    pub crop_margin: i32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence: 0.2,
            fallback_confidence: 0.5,
            scales: DEFAULT_SCALES.to_vec(),
            bucket_tolerance: 20,
            crop_margin: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrConfig {
    /// crops shorter than this are upscaled before recognition
    pub min_height: u32,
    pub min_text_len: usize,
    pub max_text_len: usize,
    pub allowlist: String,
    /// block radius of the adaptive threshold variant
    pub threshold_radius: u32,
    /// structuring element radius of the close/open variant
    pub morph_radius: u8,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_height: 150,
            min_text_len: 6,
            max_text_len: 7,
            allowlist: PLATE_ALLOWLIST.to_string(),
            threshold_radius: 5,
            morph_radius: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapConfig {
    pub enabled: bool,
    pub original_weight: f32,
    pub heatmap_weight: f32,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self { enabled: true, original_weight: 0.6, heatmap_weight: 0.4 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnhanceConfig {
    pub enabled: bool,
    pub clip_limit: f32,
    /// number of tiles along each axis
    pub tile_grid: u32,
    pub denoise_radius: u32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self { enabled: true, clip_limit: 2.0, tile_grid: 8, denoise_radius: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub ocr: OcrConfig,
    pub heatmap: HeatmapConfig,
    pub enhance: EnhanceConfig,
    /// keep crops, the enhanced frame and every OCR variant
    pub debug_artifacts: bool,
}

impl Config {

    pub fn validate(&self) -> Result<(), LprError> {
        let det = &self.detection;
        check_unit("confidence", det.confidence)?;
        check_unit("fallback confidence", det.fallback_confidence)?;
        if det.scales.is_empty() {
            return Err(LprError::config("scale list is empty"));
        }
        if let Some(bad) = det.scales.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(LprError::config(format!("scale factor {} must be positive", bad)));
        }
        if det.bucket_tolerance <= 0 {
            return Err(LprError::config("bucket tolerance must be positive"));
        }
        if det.crop_margin < 0 {
            return Err(LprError::config("crop margin must not be negative"));
        }

        let ocr = &self.ocr;
        if ocr.min_text_len == 0 || ocr.min_text_len > ocr.max_text_len {
            return Err(LprError::config(format!(
                "text length bounds {}..={} are invalid", ocr.min_text_len, ocr.max_text_len)));
        }
        if ocr.min_height == 0 {
            return Err(LprError::config("minimum OCR height must be positive"));
        }

        let heat = &self.heatmap;
        check_unit("heatmap original weight", heat.original_weight)?;
        check_unit("heatmap weight", heat.heatmap_weight)?;
        if (heat.original_weight + heat.heatmap_weight - 1.0).abs() > 1e-3 {
            return Err(LprError::config("heatmap blend weights must sum to 1"));
        }

        if self.enhance.tile_grid == 0 || self.enhance.clip_limit <= 0.0 {
            return Err(LprError::config("CLAHE needs a positive clip limit and tile grid"));
        }
        Ok(())
    }
}

fn check_unit(name: &str, v: f32) -> Result<(), LprError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(LprError::config(format!("{} {} is outside [0, 1]", name, v)))
    }
}
