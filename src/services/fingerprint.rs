//! DCT-based perceptual fingerprints.
//!
//! # Algorithm
//!
//! 1. Decode and convert to 8-bit luma
//! 2. Resize (ignoring aspect ratio) to a 32x32 sample grid with Lanczos3
//! 3. Apply a 2-D DCT-II to the grid
//! 4. Keep the `size x size` block starting at coefficient (1, 1), skipping
//!    the DC row and column
//! 5. Emit `1` for every coefficient strictly above the block mean, else `0`
//!
//! Fingerprints are persisted and compared against ones computed by earlier
//! runs, so the arithmetic below (table construction, summation order,
//! scaling) must not change.

use crate::models::Fingerprint;
use crate::{Error, Result};
use image::imageops::FilterType;
use std::f64::consts::PI;
use tracing::instrument;

/// Side length of the resampled grid fed to the DCT.
pub const SAMPLE_SIZE: usize = 32;

/// Default fingerprint granularity (16x16 = 256 bits).
pub const DEFAULT_FINGERPRINT_SIZE: usize = 16;

/// Computes perceptual fingerprints from encoded image bytes.
///
/// The engine is pure: identical bytes always produce identical
/// fingerprints. Cosine and scale tables are built once per engine.
///
/// # Example
///
/// ```rust,ignore
/// use dupwatch::services::FingerprintEngine;
///
/// let engine = FingerprintEngine::default();
/// let fingerprint = engine.compute(&std::fs::read("cat.jpg")?)?;
/// assert_eq!(fingerprint.len(), 256);
/// ```
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    size: usize,
    /// `cosines[k][n] = cos((2k + 1) / 2S * n * PI)`.
    cosines: Vec<[f64; SAMPLE_SIZE]>,
    scales: [f64; SAMPLE_SIZE],
}

impl FingerprintEngine {
    /// Creates an engine producing `size * size` bit fingerprints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] unless `1 <= size < 32`; the block
    /// starts at offset 1, so at most 31 coefficients fit per axis.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || size >= SAMPLE_SIZE {
            return Err(Error::InvalidInput(format!(
                "fingerprint size must be between 1 and {}, got {size}",
                SAMPLE_SIZE - 1
            )));
        }

        Ok(Self {
            size,
            cosines: cosine_table(),
            scales: scale_table(),
        })
    }

    /// Fingerprint granularity (bits per side).
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Computes the fingerprint of an encoded image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImage`] if the bytes cannot be decoded.
    #[instrument(skip(self, bytes), fields(operation = "fingerprint", byte_len = bytes.len()))]
    pub fn compute(&self, bytes: &[u8]) -> Result<Fingerprint> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| Error::InvalidImage(e.to_string()))?;
        self.compute_image(&decoded)
    }

    /// Computes the fingerprint of an already decoded image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImage`] for images with a zero dimension.
    pub fn compute_image(&self, decoded: &image::DynamicImage) -> Result<Fingerprint> {
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(Error::InvalidImage("image has no pixels".to_string()));
        }

        let luma = decoded.to_luma8();
        #[allow(clippy::cast_possible_truncation)]
        let side = SAMPLE_SIZE as u32;
        let sampled = image::imageops::resize(&luma, side, side, FilterType::Lanczos3);

        // signal[x][y]: column-major copy of the sample grid
        let mut signal = [[0.0_f64; SAMPLE_SIZE]; SAMPLE_SIZE];
        for (x, y, pixel) in sampled.enumerate_pixels() {
            signal[x as usize][y as usize] = f64::from(pixel.0[0]);
        }

        let block = self.low_frequency_block(&signal);
        #[allow(clippy::cast_precision_loss)]
        let mean = block.iter().sum::<f64>() / (self.size * self.size) as f64;

        let fingerprint = Fingerprint::from_bits(block.iter().map(|&c| c > mean))?;
        tracing::debug!(fingerprint = %fingerprint, "Computed fingerprint");
        Ok(fingerprint)
    }

    /// DCT-II coefficients `(u, v)` for `u, v` in `1..=size`, row-major.
    fn low_frequency_block(&self, signal: &[[f64; SAMPLE_SIZE]; SAMPLE_SIZE]) -> Vec<f64> {
        let mut block = Vec::with_capacity(self.size * self.size);
        for u in 1..=self.size {
            for v in 1..=self.size {
                block.push(self.coefficient(signal, u, v));
            }
        }
        block
    }

    fn coefficient(&self, signal: &[[f64; SAMPLE_SIZE]; SAMPLE_SIZE], u: usize, v: usize) -> f64 {
        let mut sum = 0.0;
        for (i, column) in signal.iter().enumerate() {
            for (j, intensity) in column.iter().enumerate() {
                sum += self.cosines[i][u] * self.cosines[j][v] * intensity;
            }
        }
        sum * (self.scales[u] * self.scales[v]) / 4.0
    }
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self {
            size: DEFAULT_FINGERPRINT_SIZE,
            cosines: cosine_table(),
            scales: scale_table(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn cosine_table() -> Vec<[f64; SAMPLE_SIZE]> {
    let size = SAMPLE_SIZE as f64;
    (0..SAMPLE_SIZE)
        .map(|k| {
            let mut row = [0.0; SAMPLE_SIZE];
            for (n, value) in row.iter_mut().enumerate() {
                *value = ((2 * k + 1) as f64 / (2.0 * size) * n as f64 * PI).cos();
            }
            row
        })
        .collect()
}

fn scale_table() -> [f64; SAMPLE_SIZE] {
    let mut scales = [1.0; SAMPLE_SIZE];
    scales[0] = 1.0 / 2.0_f64.sqrt();
    scales
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    /// A few hard-edged shapes at asymmetric positions, so energy spreads
    /// over the whole low-frequency block.
    fn scene(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let fx = f64::from(x) / f64::from(width);
            let fy = f64::from(y) / f64::from(height);
            let disc = (fx - 0.3).powi(2) + (fy - 0.35).powi(2) < 0.04;
            let bar = fx > 0.55 && fx < 0.85 && fy > 0.5 && fy < 0.9;
            let ring = ((fx - 0.72).powi(2) + (fy - 0.22).powi(2)).sqrt();
            if disc {
                Rgb([230, 200, 40])
            } else if bar {
                Rgb([30, 40, 90])
            } else if (0.08..0.14).contains(&ring) {
                Rgb([200, 30, 30])
            } else {
                Rgb([110, 140, 120])
            }
        }))
    }

    fn inverted(image: &DynamicImage) -> DynamicImage {
        let mut copy = image.clone();
        copy.invert();
        copy
    }

    #[test]
    fn test_rejects_out_of_range_sizes() {
        assert!(FingerprintEngine::new(0).is_err());
        assert!(FingerprintEngine::new(32).is_err());
        assert!(FingerprintEngine::new(31).is_ok());
        assert!(FingerprintEngine::new(8).is_ok());
    }

    #[test]
    fn test_default_is_256_bits() {
        let engine = FingerprintEngine::default();
        let fp = engine
            .compute(&encode(&scene(64, 48), ImageFormat::Png))
            .unwrap();
        assert_eq!(engine.size(), 16);
        assert_eq!(fp.len(), 256);
    }

    #[test]
    fn test_custom_size_length() {
        let engine = FingerprintEngine::new(8).unwrap();
        let fp = engine
            .compute(&encode(&scene(64, 48), ImageFormat::Png))
            .unwrap();
        assert_eq!(fp.len(), 64);
    }

    #[test]
    fn test_deterministic() {
        let engine = FingerprintEngine::default();
        let bytes = encode(&scene(200, 120), ImageFormat::Jpeg);
        assert_eq!(engine.compute(&bytes).unwrap(), engine.compute(&bytes).unwrap());
        assert_eq!(
            engine.compute(&bytes).unwrap(),
            FingerprintEngine::default().compute(&bytes).unwrap()
        );
    }

    #[test]
    fn test_invalid_bytes() {
        let err = FingerprintEngine::default()
            .compute(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_resized_copy_is_similar() {
        let engine = FingerprintEngine::default();
        let original = scene(400, 300);
        let smaller = original.resize_exact(200, 150, FilterType::Triangle);

        let a = engine.compute_image(&original).unwrap();
        let b = engine.compute_image(&smaller).unwrap();
        assert!(a.distance_ratio(&b) < 0.1, "ratio {}", a.distance_ratio(&b));
    }

    #[test]
    fn test_inverted_image_differs() {
        let engine = FingerprintEngine::default();
        let original = scene(256, 256);
        let a = engine.compute_image(&original).unwrap();
        let b = engine.compute_image(&inverted(&original)).unwrap();
        assert!(a.distance_ratio(&b) >= 0.1, "ratio {}", a.distance_ratio(&b));
    }

    #[test]
    fn test_cosine_table_shape() {
        let table = cosine_table();
        assert_eq!(table.len(), SAMPLE_SIZE);
        for row in &table {
            assert!((row[0] - 1.0).abs() < f64::EPSILON);
        }
        let scales = scale_table();
        assert!((scales[0] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-15);
        assert!((scales[1] - 1.0).abs() < f64::EPSILON);
    }
}
