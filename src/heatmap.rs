use image::{ GrayImage, ImageBuffer, Luma, Rgb, RgbImage };
use log::debug;
use palette::{ Gradient, LinSrgb, Srgb };

use crate::config::HeatmapConfig;
use crate::detection::Detection;

/// Accumulated detection density, one `f32` per pixel.
pub type DensityGrid = ImageBuffer<Luma<f32>, Vec<f32>>;

pub struct Heatmap {
    /// color mapped density
    pub colored: RgbImage,
    /// `colored` blended over the source image
    pub overlay: RgbImage,
}

/// Sum one anisotropic Gaussian per detection, centered on the box with
/// sigma of half its width and height, scaled by confidence.
/// Degenerate boxes and non-finite confidences are skipped.
pub fn density(width: u32, height: u32, detections: &[Detection]) -> DensityGrid {
    let mut grid = DensityGrid::new(width, height);
    for det in detections {
        if det.is_degenerate() || !det.confidence.is_finite() {
            debug!("heatmap skips {:?}", det);
            continue;
        }
        let cx = (det.x1 + det.x2) as f32 / 2.0;
        let cy = (det.y1 + det.y2) as f32 / 2.0;
        let sx = det.width() as f32 / 2.0;
        let sy = det.height() as f32 / 2.0;

        // contributions beyond 3 sigma are negligible
        let x_lo = (cx - 3.0 * sx).floor().max(0.0) as u32;
        let x_hi = ((cx + 3.0 * sx).ceil().max(0.0) as u32).min(width);
        let y_lo = (cy - 3.0 * sy).floor().max(0.0) as u32;
        let y_hi = ((cy + 3.0 * sy).ceil().max(0.0) as u32).min(height);

        for y in y_lo..y_hi {
            let dy = (y as f32 - cy) / sy;
            for x in x_lo..x_hi {
                let dx = (x as f32 - cx) / sx;
                let value = det.confidence * (-(dx * dx + dy * dy) / 2.0).exp();
                grid.get_pixel_mut(x, y).0[0] += value;
            }
        }
    }
    grid
}

/// Scale so the peak becomes 255. An all-zero grid stays zero; that is also the
/// result when every box lies entirely outside the image.
pub fn normalize(grid: &DensityGrid) -> GrayImage {
    let max = grid.pixels().map(|p| p.0[0]).fold(0.0f32, f32::max);
    let (width, height) = grid.dimensions();
    if max <= 0.0 {
        return GrayImage::new(width, height);
    }
    GrayImage::from_fn(width, height, |x, y| {
        let v = grid.get_pixel(x, y).0[0] / max * 255.0;
        Luma([v.round().max(0.0).min(255.0) as u8])
    })
}

/// Perceptual dark-blue to yellow ramp.
pub fn colorize(normalized: &GrayImage) -> RgbImage {
    let ramp = Gradient::new(vec![
        LinSrgb::new(0.004, 0.0, 0.06),
        LinSrgb::new(0.09, 0.02, 0.35),
        LinSrgb::new(0.45, 0.03, 0.25),
        LinSrgb::new(0.95, 0.25, 0.02),
        LinSrgb::new(0.98, 0.95, 0.35),
    ]);
    let mut lut = [[0u8; 3]; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let c = Srgb::from_linear(ramp.get(i as f32 / 255.0));
        let to_u8 = |v: f32| (v * 255.0).round().max(0.0).min(255.0) as u8;
        *entry = [to_u8(c.red), to_u8(c.green), to_u8(c.blue)];
    }
    let (width, height) = normalized.dimensions();
    RgbImage::from_fn(width, height, |x, y| Rgb(lut[normalized.get_pixel(x, y).0[0] as usize]))
}

pub fn blend(base: &RgbImage, top: &RgbImage, base_weight: f32, top_weight: f32) -> RgbImage {
    let (width, height) = base.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let a = base.get_pixel(x, y).0;
        let b = top.get_pixel(x, y).0;
        let mix = |i: usize| {
            (a[i] as f32 * base_weight + b[i] as f32 * top_weight).round().max(0.0).min(255.0) as u8
        };
        Rgb([mix(0), mix(1), mix(2)])
    })
}

pub fn build(image: &RgbImage, detections: &[Detection], config: &HeatmapConfig) -> Heatmap {
    let (width, height) = image.dimensions();
    let grid = density(width, height, detections);
    let colored = colorize(&normalize(&grid));
    let overlay = blend(image, &colored, config.original_weight, config.heatmap_weight);
    Heatmap { colored, overlay }
}
