//! Mass-matching threshold for binarizing a grayscale region.
//!
//! The threshold is chosen so that the pixels at or above it are the
//! smallest set holding at least `k` pixels, where `k` is the foreground
//! count of the annotation mask. Binarization then marks pixels strictly
//! *below* the threshold as foreground: in brightfield images tissue is dark
//! and the background is bright.

use image::GrayImage;

use crate::constants::{HISTOGRAM_BINS, MASK_FOREGROUND};

/// Counts per 8-bit intensity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: [u64; HISTOGRAM_BINS],
}

impl Histogram {
    /// Build a histogram of 8-bit samples.
    pub fn from_samples(samples: &[u8]) -> Self {
        let mut counts = [0u64; HISTOGRAM_BINS];
        for &v in samples {
            counts[usize::from(v)] += 1;
        }
        Self { counts }
    }

    pub fn count(&self, level: u8) -> u64 {
        self.counts[usize::from(level)]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Highest level `t` such that at least `k` samples are `>= t`.
    ///
    /// Bins are accumulated from 255 downwards until the running sum reaches
    /// `k`. Returns `None` when even all 256 bins together hold fewer than `k`
    /// samples.
    pub fn threshold_for_count(&self, k: u64) -> Option<u8> {
        let mut sum = 0u64;
        for level in (0..=u8::MAX).rev() {
            sum += self.count(level);
            if sum >= k {
                return Some(level);
            }
        }
        None
    }
}

/// Binarize in place: `v < t` becomes 255, everything else 0.
///
/// A `None` threshold sits below every level, so all pixels become 0.
pub fn apply_threshold(samples: &mut [u8], threshold: Option<u8>) {
    match threshold {
        Some(t) => {
            for v in samples.iter_mut() {
                *v = if *v < t { MASK_FOREGROUND } else { 0 };
            }
        }
        None => samples.fill(0),
    }
}

/// Compute the mass-matching threshold for `k` and apply it to `image`.
pub fn binarize_to_count(image: &mut GrayImage, k: u64) -> Option<u8> {
    let threshold = Histogram::from_samples(image.as_raw()).threshold_for_count(k);
    log::debug!(
        "Threshold for {} foreground pixels of {}: {:?}",
        k,
        u64::from(image.width()) * u64::from(image.height()),
        threshold
    );
    apply_threshold(image, threshold);
    threshold
}
