//! Augmentation: turn one aligned face crop into a small family of
//! perturbed training variants.

use image::imageops;
use image::{Rgb, RgbImage};
use rand::Rng;

/// Default maximum absolute rotation, in degrees.
pub const DEFAULT_ROTATION_DEGREES: f32 = 10.0;
/// Default probability of emitting the blurred fifth variant.
pub const DEFAULT_BLUR_PROBABILITY: f64 = 0.5;

const MAX_ROTATION_DEGREES: f32 = 180.0;
const CONTRAST_RANGE: (f32, f32) = (0.8, 1.2);
const BRIGHTNESS_RANGE: (i32, i32) = (-20, 20);
/// Sigma OpenCV derives for a 3×3 kernel when none is given.
const BLUR_SIGMA: f32 = 0.8;
const BLUR_KERNEL_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentConfig {
    /// Rotation angle is drawn uniformly from `[-rotation_degrees, rotation_degrees]`.
    pub rotation_degrees: f32,
    /// Chance of appending a Gaussian-blurred variant, in `[0, 1]`.
    pub blur_probability: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: DEFAULT_ROTATION_DEGREES,
            blur_probability: DEFAULT_BLUR_PROBABILITY,
        }
    }
}

/// Produces the variants: identity, mirror, brightness/contrast jitter,
/// small rotation and (sometimes) a mild blur, in that order.
#[derive(Debug, Clone, Default)]
pub struct Augmenter {
    config: AugmentConfig,
}

impl Augmenter {
    /// Non-finite values fall back to the defaults; the rest are clamped into range.
    pub fn new(config: AugmentConfig) -> Self {
        let rotation_degrees = if config.rotation_degrees.is_finite() {
            config.rotation_degrees.abs().min(MAX_ROTATION_DEGREES)
        } else {
            tracing::warn!(value = config.rotation_degrees, "non-finite rotation; using default");
            DEFAULT_ROTATION_DEGREES
        };
        let blur_probability = if config.blur_probability.is_finite() {
            config.blur_probability.clamp(0.0, 1.0)
        } else {
            tracing::warn!(value = config.blur_probability, "non-finite blur probability; using default");
            DEFAULT_BLUR_PROBABILITY
        };
        Self {
            config: AugmentConfig {
                rotation_degrees,
                blur_probability,
            },
        }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Augment using the thread-local random source.
    pub fn augment(&self, crop: &RgbImage) -> Vec<RgbImage> {
        self.augment_with(crop, &mut rand::thread_rng())
    }

    pub fn augment_with<R: Rng + ?Sized>(&self, crop: &RgbImage, rng: &mut R) -> Vec<RgbImage> {
        let mut variants = Vec::with_capacity(5);
        variants.push(crop.clone());
        variants.push(imageops::flip_horizontal(crop));

        let alpha = rng.gen_range(CONTRAST_RANGE.0..=CONTRAST_RANGE.1);
        let beta = rng.gen_range(BRIGHTNESS_RANGE.0..=BRIGHTNESS_RANGE.1);
        variants.push(scale_intensity(crop, alpha, beta as f32));

        let max = self.config.rotation_degrees;
        let angle = if max > 0.0 { rng.gen_range(-max..=max) } else { 0.0 };
        variants.push(rotate_about_center(crop, angle));

        if rng.gen_bool(self.config.blur_probability) {
            variants.push(gaussian_blur_3x3(crop));
        }

        tracing::trace!(alpha, beta, angle, count = variants.len(), "augmented face crop");
        variants
    }
}

/// `p * alpha + beta`, saturated to `[0, 255]`.
pub fn scale_intensity(image: &RgbImage, alpha: f32, beta: f32) -> RgbImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = (*c as f32 * alpha + beta).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Rotate by `degrees` (counter-clockwise) about the image center, keeping
/// dimensions. Samples bilinearly; pixels mapped from outside the source
/// replicate the nearest edge.
pub fn rotate_about_center(image: &RgbImage, degrees: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = w as f32 / 2.0;
    let cy = h as f32 / 2.0;
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;

    RgbImage::from_fn(w, h, |ox, oy| {
        // Inverse map: destination → source. Image y grows downward, so a
        // counter-clockwise visual rotation uses +sin on x.
        let dx = ox as f32 - cx;
        let dy = oy as f32 - cy;
        let sx = (cos * dx - sin * dy + cx).clamp(0.0, max_x);
        let sy = (sin * dx + cos * dy + cy).clamp(0.0, max_y);
        bilinear(image, sx, sy)
    })
}

fn bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = image.dimensions();
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let tl = image.get_pixel(x0, y0);
    let tr = image.get_pixel(x1, y0);
    let bl = image.get_pixel(x0, y1);
    let br = image.get_pixel(x1, y1);

    Rgb(std::array::from_fn(|c| {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let half = (size / 2) as f32;
    let raw: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - half;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = raw.iter().sum();
    raw.into_iter().map(|v| v / sum).collect()
}

/// Separable 3×3 Gaussian blur with edge replication.
pub fn gaussian_blur_3x3(image: &RgbImage) -> RgbImage {
    let kernel = gaussian_kernel(BLUR_KERNEL_SIZE, BLUR_SIGMA);
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let half = (BLUR_KERNEL_SIZE / 2) as i64;
    let (wi, hi) = (w as usize, h as usize);

    // Horizontal pass into f32, vertical pass back to u8.
    let mut temp = vec![0.0f32; wi * hi * 3];
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let mut sum = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = (x as i64 + k as i64 - half).clamp(0, w as i64 - 1) as u32;
                    sum += image.get_pixel(sx, y)[c] as f32 * weight;
                }
                temp[(y as usize * wi + x as usize) * 3 + c] = sum;
            }
        }
    }

    RgbImage::from_fn(w, h, |x, y| {
        Rgb(std::array::from_fn(|c| {
            let mut sum = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y as i64 + k as i64 - half).clamp(0, h as i64 - 1) as usize;
                sum += temp[(sy * wi + x as usize) * 3 + c] * weight;
            }
            sum.round().clamp(0.0, 255.0) as u8
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8]))
    }

    #[test]
    fn test_first_variant_is_identical() {
        let crop = gradient(160, 160);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let variants = Augmenter::default().augment_with(&crop, &mut rng);
            assert_eq!(variants[0], crop);
            assert!(variants.len() == 4 || variants.len() == 5, "len {}", variants.len());
        }
    }

    #[test]
    fn test_all_variants_keep_dimensions() {
        let crop = gradient(40, 30);
        let aug = Augmenter::new(AugmentConfig { rotation_degrees: 15.0, blur_probability: 1.0 });
        for v in aug.augment(&crop) {
            assert_eq!(v.dimensions(), (40, 30));
        }
    }

    #[test]
    fn test_blur_probability_controls_length() {
        let crop = gradient(16, 16);
        let mut rng = StdRng::seed_from_u64(1);
        let never = Augmenter::new(AugmentConfig { blur_probability: 0.0, ..Default::default() });
        let always = Augmenter::new(AugmentConfig { blur_probability: 1.0, ..Default::default() });
        for _ in 0..5 {
            assert_eq!(never.augment_with(&crop, &mut rng).len(), 4);
            assert_eq!(always.augment_with(&crop, &mut rng).len(), 5);
        }
    }

    #[test]
    fn test_out_of_range_probability_is_clamped() {
        let aug = Augmenter::new(AugmentConfig { rotation_degrees: -12.0, blur_probability: 3.0 });
        assert_eq!(aug.config().blur_probability, 1.0);
        assert_eq!(aug.config().rotation_degrees, 12.0);
    }

    #[test]
    fn test_non_finite_config_falls_back_to_defaults() {
        let aug = Augmenter::new(AugmentConfig {
            rotation_degrees: f32::INFINITY,
            blur_probability: f64::NAN,
        });
        assert_eq!(aug.config(), &AugmentConfig::default());

        let mut rng = StdRng::seed_from_u64(3);
        let variants = aug.augment_with(&gradient(12, 12), &mut rng);
        assert!(variants.len() == 4 || variants.len() == 5);

        let wide = Augmenter::new(AugmentConfig { rotation_degrees: f32::MAX, blur_probability: 0.0 });
        assert_eq!(wide.config().rotation_degrees, 180.0);
        assert_eq!(wide.augment_with(&gradient(12, 12), &mut rng).len(), 4);
    }

    #[test]
    fn test_second_variant_is_mirror() {
        let crop = gradient(20, 10);
        let variants = Augmenter::default().augment(&crop);
        for y in 0..10 {
            for x in 0..20 {
                assert_eq!(variants[1].get_pixel(x, y), crop.get_pixel(19 - x, y));
            }
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let crop = RgbImage::from_pixel(8, 8, Rgb([100, 100, 100]));
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..20 {
            let jittered = &Augmenter::default().augment_with(&crop, &mut rng)[2];
            let v = jittered.get_pixel(3, 3)[0];
            assert!((60..=140).contains(&v), "value {v}");
        }
    }

    #[test]
    fn test_scale_intensity_saturates() {
        let img = RgbImage::from_pixel(2, 2, Rgb([250, 10, 128]));
        let bright = scale_intensity(&img, 1.2, 20.0);
        assert_eq!(bright.get_pixel(0, 0), &Rgb([255, 32, 174]));
        let dark = scale_intensity(&img, 0.8, -20.0);
        assert_eq!(dark.get_pixel(0, 0), &Rgb([180, 0, 82]));
    }

    #[test]
    fn test_rotation_zero_is_identity() {
        let crop = gradient(24, 24);
        assert_eq!(rotate_about_center(&crop, 0.0), crop);
    }

    #[test]
    fn test_rotation_of_uniform_stays_uniform() {
        let crop = RgbImage::from_pixel(32, 32, Rgb([90, 60, 30]));
        let rotated = rotate_about_center(&crop, 9.5);
        assert!(rotated.pixels().all(|p| *p == Rgb([90, 60, 30])));
    }

    #[test]
    fn test_rotation_moves_content() {
        let crop = gradient(32, 32);
        assert_ne!(rotate_about_center(&crop, 10.0), crop);
    }

    #[test]
    fn test_gaussian_kernel_normalized() {
        let k = gaussian_kernel(3, BLUR_SIGMA);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(k[1] > k[0] && (k[0] - k[2]).abs() < 1e-6);
    }

    #[test]
    fn test_blur_smooths_impulse() {
        let mut img = RgbImage::from_pixel(5, 5, Rgb([0, 0, 0]));
        img.put_pixel(2, 2, Rgb([255, 255, 255]));
        let blurred = gaussian_blur_3x3(&img);
        let center = blurred.get_pixel(2, 2)[0];
        assert!(center < 255 && center > 0);
        assert!(blurred.get_pixel(1, 2)[0] > 0);
        assert_eq!(blurred.get_pixel(0, 0)[0], 0);
    }
}
