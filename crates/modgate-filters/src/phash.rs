//! Perceptual image hashing
//!
//! DCT-based 64-bit pHash: the image is downscaled to 32×32 grayscale, a
//! 2-D DCT is taken, and the 8×8 low-frequency block is thresholded
//! against its median. Visually similar images produce hashes with small
//! Hamming distance; identical bytes always produce the identical hash.

use image::imageops::FilterType;
use image::DynamicImage;
use modgate_core::{Error, Result};

const SAMPLE_SIZE: usize = 32;
const BLOCK_SIZE: usize = 8;

/// Decode image bytes and compute the perceptual hash.
///
/// Fails with an image-unavailable error when the bytes do not decode.
pub fn phash_from_bytes(data: &[u8]) -> Result<u64> {
    let img = image::load_from_memory(data)
        .map_err(|e| Error::image_unavailable(format!("image decode failed: {e}")))?;
    Ok(phash(&img))
}

/// Compute the 64-bit DCT perceptual hash of a decoded image.
pub fn phash(img: &DynamicImage) -> u64 {
    let gray = img
        .resize_exact(SAMPLE_SIZE as u32, SAMPLE_SIZE as u32, FilterType::Triangle)
        .to_luma8();

    let mut values = [[0f64; SAMPLE_SIZE]; SAMPLE_SIZE];
    for (x, y, pixel) in gray.enumerate_pixels() {
        values[y as usize][x as usize] = f64::from(pixel.0[0]);
    }

    let freq = dct_2d(&values);

    let mut coeffs = [0f64; BLOCK_SIZE * BLOCK_SIZE];
    for row in 0..BLOCK_SIZE {
        for col in 0..BLOCK_SIZE {
            coeffs[row * BLOCK_SIZE + col] = freq[row][col];
        }
    }

    let mut sorted = coeffs;
    sorted.sort_by(f64::total_cmp);
    let median = (sorted[coeffs.len() / 2 - 1] + sorted[coeffs.len() / 2]) / 2.0;

    let mut hash = 0u64;
    for (i, &coeff) in coeffs.iter().enumerate() {
        if coeff > median {
            hash |= 1u64 << (63 - i);
        }
    }
    hash
}

/// Number of differing bits between two hashes; 0 means identical.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Big-endian byte form of a pHash, as stored in the image Bloom filter.
pub fn phash_to_bytes(phash: u64) -> [u8; 8] {
    phash.to_be_bytes()
}

/// Separable 2-D DCT-II: rows first, then columns.
fn dct_2d(input: &[[f64; SAMPLE_SIZE]; SAMPLE_SIZE]) -> [[f64; SAMPLE_SIZE]; SAMPLE_SIZE] {
    let mut rows = [[0f64; SAMPLE_SIZE]; SAMPLE_SIZE];
    for (i, row) in input.iter().enumerate() {
        rows[i] = dct_1d(row);
    }

    let mut out = [[0f64; SAMPLE_SIZE]; SAMPLE_SIZE];
    for col in 0..SAMPLE_SIZE {
        let mut column = [0f64; SAMPLE_SIZE];
        for row in 0..SAMPLE_SIZE {
            column[row] = rows[row][col];
        }
        let transformed = dct_1d(&column);
        for row in 0..SAMPLE_SIZE {
            out[row][col] = transformed[row];
        }
    }
    out
}

fn dct_1d(input: &[f64; SAMPLE_SIZE]) -> [f64; SAMPLE_SIZE] {
    let n = SAMPLE_SIZE as f64;
    let mut out = [0f64; SAMPLE_SIZE];
    for (k, slot) in out.iter_mut().enumerate() {
        let mut sum = 0f64;
        for (i, &value) in input.iter().enumerate() {
            let angle = std::f64::consts::PI * (2.0 * i as f64 + 1.0) * k as f64 / (2.0 * n);
            sum += value * angle.cos();
        }
        *slot = sum;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let buf = ImageBuffer::from_fn(width, height, |x, y| {
            let v = ((x * 255 / width.max(1)) as u8).wrapping_add((y * 3) as u8);
            Rgb([v, v / 2, 255 - v])
        });
        DynamicImage::ImageRgb8(buf)
    }

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_identical_bytes_identical_hash() {
        let bytes = png_bytes(&gradient_image(64, 64));
        let first = phash_from_bytes(&bytes).unwrap();
        let second = phash_from_bytes(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(hamming_distance(first, second), 0);
    }

    #[test]
    fn test_minor_edit_stays_near() {
        let original = gradient_image(64, 64);
        let mut edited = original.to_rgb8();
        edited.put_pixel(10, 10, Rgb([0, 0, 0]));
        let edited = DynamicImage::ImageRgb8(edited);

        let distance = hamming_distance(phash(&original), phash(&edited));
        assert!(distance <= 10, "one-pixel edit moved {distance} bits");
    }

    #[test]
    fn test_different_content_differs() {
        let gradient = phash(&gradient_image(64, 64));

        let checker = ImageBuffer::from_fn(64, 64, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgb([255u8, 255, 255])
            } else {
                Rgb([0u8, 0, 0])
            }
        });
        let checker = phash(&DynamicImage::ImageRgb8(checker));

        assert_ne!(gradient, checker);
    }

    #[test]
    fn test_decode_failure_is_image_unavailable() {
        let err = phash_from_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::ImageUnavailable(_)));
    }

    #[test]
    fn test_phash_bytes_big_endian() {
        assert_eq!(
            phash_to_bytes(0x0102_0304_0506_0708),
            [1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(0, 0), 0);
        assert_eq!(hamming_distance(0b1011, 0b1000), 2);
        assert_eq!(hamming_distance(u64::MAX, 0), 64);
    }
}
