// SPDX-License-Identifier: MIT
//! Structural similarity between two grayscale images
//!
//! Three estimators are tried in order, each cheaper than the last:
//! 1. Windowed SSIM (7x7 uniform window, sample covariance), averaged over
//!    every window that fits inside the image.
//! 2. Closed-form SSIM over the whole image as a single window.
//! 3. The closed form again after downsampling both images.

use image::imageops::{self, FilterType};
use image::GrayImage;

const DATA_RANGE: f64 = 255.0;
const C1: f64 = (0.01 * DATA_RANGE) * (0.01 * DATA_RANGE);
const C2: f64 = (0.03 * DATA_RANGE) * (0.03 * DATA_RANGE);

/// Edge length of the sliding window
pub const WINDOW_SIZE: u32 = 7;

/// Largest image (in pixels) the windowed estimator accepts
pub const WINDOWED_MAX_PIXELS: u64 = 1 << 22;

/// Largest image (in pixels) the full-image closed form accepts
pub const GLOBAL_MAX_PIXELS: u64 = 1 << 24;

/// SSIM of two equally sized images, or `None` when they cannot be compared
pub fn ssim(a: &GrayImage, b: &GrayImage, downsample: u32) -> Option<f64> {
    if a.dimensions() != b.dimensions() || a.width() == 0 || a.height() == 0 {
        return None;
    }

    windowed_ssim(a, b)
        .or_else(|| global_ssim(a, b))
        .or_else(|| downsampled_ssim(a, b, downsample))
}

/// Mean SSIM over all full 7x7 windows
///
/// Slides the window with running integer column sums, so the cost is linear
/// in the pixel count and the extra memory is linear in the image width.
pub fn windowed_ssim(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    let (width, height) = a.dimensions();
    if b.dimensions() != (width, height)
        || width < WINDOW_SIZE
        || height < WINDOW_SIZE
        || width as u64 * height as u64 > WINDOWED_MAX_PIXELS
    {
        return None;
    }

    let (width, height) = (width as usize, height as usize);
    let size = WINDOW_SIZE as usize;
    let (pixels_a, pixels_b) = (a.as_raw(), b.as_raw());
    let moments = |i: usize| {
        let (pa, pb) = (pixels_a[i] as u64, pixels_b[i] as u64);
        [pa, pb, pa * pa, pb * pb, pa * pb]
    };

    // Per-column sums over the current band of `size` rows
    let mut columns = vec![[0u64; 5]; width];
    for y in 0..size {
        for (x, column) in columns.iter_mut().enumerate() {
            add(column, moments(y * width + x));
        }
    }

    let n = (WINDOW_SIZE * WINDOW_SIZE) as f64;
    let cov_norm = n / (n - 1.0);
    let mut total = 0.0;
    let mut windows = 0u64;

    for top in 0..=(height - size) {
        if top > 0 {
            let (leaving, entering) = ((top - 1) * width, (top + size - 1) * width);
            for (x, column) in columns.iter_mut().enumerate() {
                sub(column, moments(leaving + x));
                add(column, moments(entering + x));
            }
        }

        let mut window = [0u64; 5];
        for column in &columns[..size] {
            add(&mut window, *column);
        }
        for left in 0..=(width - size) {
            if left > 0 {
                sub(&mut window, columns[left - 1]);
                add(&mut window, columns[left + size - 1]);
            }
            let [sa, sb, saa, sbb, sab] = window.map(|v| v as f64);
            let (mean_a, mean_b) = (sa / n, sb / n);
            let var_a = cov_norm * (saa / n - mean_a * mean_a);
            let var_b = cov_norm * (sbb / n - mean_b * mean_b);
            let cov = cov_norm * (sab / n - mean_a * mean_b);
            total += ssim_formula(mean_a, mean_b, var_a, var_b, cov);
            windows += 1;
        }
    }

    Some(total / windows as f64)
}

#[inline]
fn add(acc: &mut [u64; 5], values: [u64; 5]) {
    for (a, v) in acc.iter_mut().zip(values) {
        *a += v;
    }
}

#[inline]
fn sub(acc: &mut [u64; 5], values: [u64; 5]) {
    for (a, v) in acc.iter_mut().zip(values) {
        *a -= v;
    }
}

/// Closed-form SSIM treating the whole image as one window
pub fn global_ssim(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    let pixels = a.width() as u64 * a.height() as u64;
    if pixels > GLOBAL_MAX_PIXELS {
        return None;
    }
    closed_form(a, b)
}

/// Closed-form SSIM after shrinking both images to at most `max_side` pixels
pub fn downsampled_ssim(a: &GrayImage, b: &GrayImage, max_side: u32) -> Option<f64> {
    closed_form(&thumbnail(a, max_side), &thumbnail(b, max_side))
}

fn thumbnail(image: &GrayImage, max_side: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return image.clone();
    }
    let scale = max_side as f64 / longest as f64;
    let new_width = ((width as f64 * scale) as u32).max(1);
    let new_height = ((height as f64 * scale) as u32).max(1);
    imageops::resize(image, new_width, new_height, FilterType::Lanczos3)
}

fn closed_form(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let pixels_a = a.as_raw();
    let pixels_b = b.as_raw();
    let count = pixels_a.len();
    if count == 0 {
        return None;
    }

    let n = count as f64;
    let mean_a = pixels_a.iter().map(|&p| p as f64).sum::<f64>() / n;
    let mean_b = pixels_b.iter().map(|&p| p as f64).sum::<f64>() / n;

    let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
    for (&pa, &pb) in pixels_a.iter().zip(pixels_b) {
        let da = pa as f64 - mean_a;
        let db = pb as f64 - mean_b;
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    let ddof = (n - 1.0).max(1.0);

    Some(ssim_formula(
        mean_a,
        mean_b,
        var_a / ddof,
        var_b / ddof,
        cov / ddof,
    ))
}

#[inline]
fn ssim_formula(mean_a: f64, mean_b: f64, var_a: f64, var_b: f64, cov: f64) -> f64 {
    let numerator = (2.0 * mean_a * mean_b + C1) * (2.0 * cov + C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2);
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
