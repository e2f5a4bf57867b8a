//! Plate text by plurality vote over five preprocessings of the same crop.

use image::{ imageops, imageops::FilterType, GrayImage, RgbImage };
use imageproc::{ contrast, distance_transform::Norm, morphology };
use log::{ debug, warn };

use std::collections::BTreeMap;

use crate::config::OcrConfig;
use crate::error::LprError;

/// Shown in place of a plate that produced no usable candidate.
pub const NO_TEXT: &str = "NO TEXT";

/// A text recognition engine.
pub trait Recognizer {
    /// Text fragments found in `image`. An empty vector means nothing legible.
    /// `allowlist` restricts the characters the engine may emit.
    fn recognize(&self, image: &GrayImage, allowlist: Option<&str>) -> Result<Vec<String>, LprError>;
}

impl<R: Recognizer + ?Sized> Recognizer for &R {
    fn recognize(&self, image: &GrayImage, allowlist: Option<&str>) -> Result<Vec<String>, LprError> {
        (**self).recognize(image, allowlist)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Gray,
    Threshold,
    Morphology,
    ThresholdInverted,
    MorphologyInverted,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Gray,
        Variant::Threshold,
        Variant::Morphology,
        Variant::ThresholdInverted,
        Variant::MorphologyInverted,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variant::Gray => "gray",
            Variant::Threshold => "thresh",
            Variant::Morphology => "morph",
            Variant::ThresholdInverted => "thresh_inv",
            Variant::MorphologyInverted => "morph_inv",
        }
    }
}

/// Grayscale, upscale to `min_height` when shorter, then equalize.
pub fn prepare(crop: &RgbImage, config: &OcrConfig) -> GrayImage {
    let mut gray = imageops::grayscale(crop);
    let (width, height) = gray.dimensions();
    if height > 0 && height < config.min_height {
        let scale = config.min_height as f32 / height as f32;
        let new_width = ((width as f32 * scale).round() as u32).max(1);
        gray = imageops::resize(&gray, new_width, config.min_height, FilterType::CatmullRom);
        debug!("upscaled crop {}x{} -> {}x{}", width, height, new_width, config.min_height);
    }
    contrast::equalize_histogram(&gray)
}

/// The five recognizer inputs, in `Variant::ALL` order.
pub fn variants(equalized: &GrayImage, config: &OcrConfig) -> Vec<(Variant, GrayImage)> {
    let threshold = contrast::adaptive_threshold(equalized, config.threshold_radius);
    let k = config.morph_radius;
    let cleaned = morphology::open(&morphology::close(&threshold, Norm::LInf, k), Norm::LInf, k);

    let mut threshold_inv = threshold.clone();
    imageops::invert(&mut threshold_inv);
    let mut cleaned_inv = cleaned.clone();
    imageops::invert(&mut cleaned_inv);

    vec![
        (Variant::Gray, equalized.clone()),
        (Variant::Threshold, threshold),
        (Variant::Morphology, cleaned),
        (Variant::ThresholdInverted, threshold_inv),
        (Variant::MorphologyInverted, cleaned_inv),
    ]
}

/// Keep ASCII letters and digits, uppercased. `None` when shorter than
/// `min_len`; longer strings are cut to `max_len`.
pub fn normalize_candidate(fragment: &str, min_len: usize, max_len: usize) -> Option<String> {
    let cleaned: String = fragment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() < min_len {
        return None;
    }
    Some(cleaned.chars().take(max_len).collect())
}

#[derive(Debug, Default, Clone)]
pub struct VoteTally {
    counts: BTreeMap<String, usize>,
}

impl VoteTally {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, candidate: String) {
        *self.counts.entry(candidate).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn votes(&self, candidate: &str) -> usize {
        self.counts.get(candidate).copied().unwrap_or(0)
    }

    /// Most voted candidate and its count. Ties go to the longer string, then
    /// to the lexicographically smaller one.
    pub fn winner(&self) -> Option<(&str, usize)> {
        self.counts
            .iter()
            .max_by(|(a, va), (b, vb)| {
                va.cmp(vb)
                    .then(a.len().cmp(&b.len()))
                    .then(b.cmp(a))
            })
            .map(|(text, votes)| (text.as_str(), *votes))
    }
}

#[derive(Debug, Clone)]
pub struct OcrOutcome {
    /// `None` when no variant produced a candidate
    pub text: Option<String>,
    pub votes: usize,
    pub variants: Vec<(Variant, GrayImage)>,
}

impl OcrOutcome {
    pub fn label(&self) -> &str {
        self.text.as_deref().unwrap_or(NO_TEXT)
    }
}

/// Run `recognizer` on every variant of `crop` and vote.
///
/// A failing recognizer call contributes no candidates; it never aborts the vote.
pub fn read_plate<R: Recognizer>(recognizer: &R, crop: &RgbImage, config: &OcrConfig) -> OcrOutcome {
    let equalized = prepare(crop, config);
    let variants = variants(&equalized, config);

    let mut tally = VoteTally::new();
    for (variant, image) in &variants {
        let fragments = match recognizer.recognize(image, Some(&config.allowlist)) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!("recognizer failed on {} variant: {}", variant.name(), e);
                continue;
            }
        };
        for fragment in fragments {
            match normalize_candidate(&fragment, config.min_text_len, config.max_text_len) {
                Some(candidate) => {
                    debug!("{}: {:?} -> {}", variant.name(), fragment, candidate);
                    tally.add(candidate);
                }
                None => debug!("{}: dropped {:?}", variant.name(), fragment),
            }
        }
    }

    let (text, votes) = match tally.winner() {
        Some((text, votes)) => (Some(text.to_string()), votes),
        None => (None, 0),
    };
    OcrOutcome { text, votes, variants }
}
