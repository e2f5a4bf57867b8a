//! Frame enhancement applied before detection: CLAHE on the L*a*b* lightness,
//! an edge-preserving median pass and a 3x3 sharpen.

use image::{ DynamicImage, GrayImage, Luma, Rgb, RgbImage };
use imageproc::filter;
use log::debug;
use palette::{ Lab, Srgb };

use crate::config::EnhanceConfig;
use crate::error::LprError;

const SHARPEN_KERNEL: [i32; 9] = [
    -1, -1, -1,
    -1,  9, -1,
    -1, -1, -1,
];

/// Enhance a 3-channel frame. Output has the same dimensions as the input.
pub fn enhance(image: &DynamicImage, config: &EnhanceConfig) -> Result<RgbImage, LprError> {
    let channels = image.color().channel_count();
    if channels != 3 {
        return Err(LprError::invalid_image(format!("expected 3 channels, got {}", channels)));
    }
    let rgb = image.to_rgb8();
    debug!("enhancing {}x{} frame", rgb.width(), rgb.height());

    let equalized = equalize_lightness(&rgb, config.clip_limit, config.tile_grid);
    let r = config.denoise_radius;
    let denoised = filter::median_filter(&equalized, r, r);
    Ok(sharpen(&denoised))
}

pub fn sharpen(image: &RgbImage) -> RgbImage {
    filter::filter3x3::<_, i32, u8>(image, &SHARPEN_KERNEL)
}

/// CLAHE on the lightness channel only; chroma is carried through untouched.
pub fn equalize_lightness(image: &RgbImage, clip_limit: f32, tile_grid: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut lightness = GrayImage::new(width, height);
    let mut chroma = Vec::with_capacity((width * height) as usize);

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let lab: Lab = Srgb::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0).into();
        let l = (lab.l / 100.0 * 255.0).round().max(0.0).min(255.0) as u8;
        lightness.put_pixel(x, y, Luma([l]));
        chroma.push((lab.a, lab.b));
    }

    let lightness = clahe(&lightness, clip_limit, tile_grid);

    let mut output = RgbImage::new(width, height);
    for ((x, y, pixel), (a, b)) in output.enumerate_pixels_mut().zip(chroma) {
        let l = lightness.get_pixel(x, y).0[0] as f32 / 255.0 * 100.0;
        let lab: Lab = Lab::new(l, a, b);
        let rgb = Srgb::from(lab);
        let to_u8 = |v: f32| (v * 255.0).round().max(0.0).min(255.0) as u8;
        *pixel = Rgb([to_u8(rgb.red), to_u8(rgb.green), to_u8(rgb.blue)]);
    }
    output
}

/// Contrast limited adaptive histogram equalization.
///
/// The image is split into a `tile_grid` x `tile_grid` grid (fewer tiles along an
/// axis shorter than the grid). Each tile gets a histogram clipped at
/// `clip_limit` times the uniform bin height, the clipped excess spread evenly
/// over all bins. Pixels are mapped by bilinear interpolation between the four
/// nearest tile lookup tables.
pub fn clahe(image: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let tiles_x = tile_grid.min(width).max(1) as usize;
    let tiles_y = tile_grid.min(height).max(1) as usize;
    let bound = |i: usize, tiles: usize, len: u32| (i as u64 * len as u64 / tiles as u64) as u32;

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, x1) = (bound(tx, tiles_x, width), bound(tx + 1, tiles_x, width));
            let (y0, y1) = (bound(ty, tiles_y, height), bound(ty + 1, tiles_y, height));
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts[ty * tiles_x + tx] = tile_lut(&mut hist, area, clip_limit);
        }
    }

    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;
    let neighbours = |pos: u32, size: f32, tiles: usize| {
        let g = (pos as f32 + 0.5) / size - 0.5;
        if g <= 0.0 {
            return (0, 0, 0.0);
        }
        let i0 = (g.floor() as usize).min(tiles - 1);
        let i1 = (i0 + 1).min(tiles - 1);
        let frac = if i0 == i1 { 0.0 } else { g - i0 as f32 };
        (i0, i1, frac)
    };

    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let v = image.get_pixel(x, y).0[0] as usize;
        let (x0, x1, fx) = neighbours(x, tile_w, tiles_x);
        let (y0, y1, fy) = neighbours(y, tile_h, tiles_y);
        let at = |tx: usize, ty: usize| luts[ty * tiles_x + tx][v] as f32;
        let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
        let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
        let value = top * (1.0 - fy) + bottom * fy;
        *pixel = Luma([value.round().max(0.0).min(255.0) as u8]);
    }
    output
}

fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let mut remainder = excess % 256;
    for bin in hist.iter_mut() {
        *bin += share;
        if remainder > 0 {
            *bin += 1;
            remainder -= 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (value, bin) in lut.iter_mut().zip(hist.iter()) {
        cdf += *bin;
        *value = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}


#[cfg(test)]
mod test {

    use image::{ DynamicImage, GrayImage, Luma, Rgb, RgbImage, RgbaImage };

    use std::error::Error;

    use crate::config::EnhanceConfig;
    use crate::error::LprErrorKind;
    use super::{ clahe, enhance, sharpen };

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn enhance_keeps_dimensions() -> Result<(), Box<dyn Error>> {
        let input = DynamicImage::ImageRgb8(gradient(97, 41));
        let config = EnhanceConfig::default();
        let once = enhance(&input, &config)?;
        assert_eq!(once.dimensions(), (97, 41));
        let twice = enhance(&DynamicImage::ImageRgb8(once), &config)?;
        assert_eq!(twice.dimensions(), (97, 41));
        Ok(())
    }

    #[test]
    fn enhance_rejects_non_rgb() {
        let input = DynamicImage::ImageRgba8(RgbaImage::new(8, 8));
        let err = enhance(&input, &EnhanceConfig::default()).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidImage(_)));

        let gray = DynamicImage::ImageLuma8(GrayImage::new(8, 8));
        assert!(enhance(&gray, &EnhanceConfig::default()).is_err());
    }

    #[test]
    fn clahe_flat_image_stays_flat() {
        let image = GrayImage::from_pixel(64, 64, Luma([90]));
        let out = clahe(&image, 2.0, 8);
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn clahe_stretches_low_contrast() {
        let image = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 8) as u8]));
        let out = clahe(&image, 4.0, 2);
        let min = out.pixels().map(|p| p.0[0]).min().unwrap_or(0);
        let max = out.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        assert!(max - min > 7);
    }

    #[test]
    fn clahe_handles_images_smaller_than_grid() {
        let image = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 10) as u8]));
        let out = clahe(&image, 2.0, 8);
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn sharpen_leaves_flat_regions_alone() {
        let image = RgbImage::from_pixel(5, 5, Rgb([120, 60, 30]));
        let out = sharpen(&image);
        assert_eq!(*out.get_pixel(2, 2), Rgb([120, 60, 30]));
    }
}
