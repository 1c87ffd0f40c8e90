//! Random-phase noise resynthesis from a mel-band energy envelope.
//!
//! Each output block gets a fresh random complex spectrum (uniform phase, magnitude
//! taken from interpolating the per-block mel-band envelope across bins), smoothed in
//! the frequency domain by convolving with a short window kernel so neighboring bins
//! aren't independent (otherwise the resynthesized noise has an audible comb-filtered
//! texture once IFFT'd back to the time domain), then inverse-transformed.

use crate::block::NOISE_BANDS;
use crate::random::Random;

/// Precomputed per-bin mel-band index + interpolation weight, reused across blocks of
/// a fixed `(block_size, mix_freq)` pair.
pub struct NoiseBandPartition {
    /// For each FFT bin, the (lower band index, upper band index, interpolation `t`).
    bins: Vec<(usize, usize, f64)>,
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

fn band_center_hz(band: usize) -> f64 {
    let mel_low = 30.0 + 4000.0 * band as f64 / NOISE_BANDS as f64;
    let mel_high = 30.0 + 4000.0 * (band + 1) as f64 / NOISE_BANDS as f64;
    0.5 * (mel_to_hz(mel_low) + mel_to_hz(mel_high))
}

impl NoiseBandPartition {
    pub fn new(block_size: usize, mix_freq: f64) -> NoiseBandPartition {
        let n_bins = block_size / 2 + 1;
        let centers: Vec<f64> = (0..NOISE_BANDS).map(band_center_hz).collect();
        let mut bins = Vec::with_capacity(n_bins);
        for k in 0..n_bins {
            let hz = k as f64 * mix_freq / block_size as f64;
            let mut upper = 0;
            while upper < NOISE_BANDS && centers[upper] < hz {
                upper += 1;
            }
            if upper == 0 {
                bins.push((0, 0, 0.0));
            } else if upper >= NOISE_BANDS {
                bins.push((NOISE_BANDS - 1, NOISE_BANDS - 1, 0.0));
            } else {
                let lower = upper - 1;
                let t = (hz - centers[lower]) / (centers[upper] - centers[lower]).max(1e-9);
                bins.push((lower, upper, t.clamp(0.0, 1.0)));
            }
        }
        NoiseBandPartition { bins }
    }

    pub fn envelope_at_bin(&self, envelope: &[f64; NOISE_BANDS], bin: usize) -> f64 {
        let (lo, hi, t) = self.bins[bin];
        envelope[lo] * (1.0 - t) + envelope[hi] * t
    }
}

/// BH92 (7-tap) or Hann (3-tap, with the two outer coefficients left at zero) smoothing
/// kernel applied in the frequency domain before the inverse transform, matching the
/// original noise decoder's choice of analysis window for spectral smoothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmoothingWindow {
    BlackmanHarris92,
    Hann,
}

impl SmoothingWindow {
    fn kernel(self) -> [f64; 7] {
        match self {
            SmoothingWindow::BlackmanHarris92 => {
                const K0: f64 = 0.35875;
                const K1: f64 = 0.244145;
                const K2: f64 = 0.07064;
                const K3: f64 = 0.00584;
                [K3, K2, K1, K0, K1, K2, K3]
            }
            SmoothingWindow::Hann => {
                const K0: f64 = 0.5;
                const K1: f64 = 0.25;
                [0.0, 0.0, K1, K0, K1, 0.0, 0.0]
            }
        }
    }
}

/// Energy of the smoothing window used by the convolution kernel above, matching the
/// original decoder's constant for any analysis window in this family.
const EWW: f64 = 0.375;

pub struct NoiseDecoder {
    partition: NoiseBandPartition,
    block_size: usize,
    mix_freq: f64,
    window: SmoothingWindow,
}

impl NoiseDecoder {
    pub fn new(block_size: usize, mix_freq: f64, window: SmoothingWindow) -> NoiseDecoder {
        NoiseDecoder {
            partition: NoiseBandPartition::new(block_size, mix_freq),
            block_size,
            mix_freq,
            window,
        }
    }

    pub fn preferred_block_size(&self) -> usize {
        self.block_size
    }

    /// Generates one block's worth of random-phase noise spectrum, smoothed by the
    /// window kernel, into `re`/`im` (length `block_size/2 + 1`). `portamento_active`
    /// zeroes bins above the current fundamental's Nyquist-safe range to avoid
    /// aliasing artifacts while pitch is sliding (matching the live decoder's
    /// anti-alias behavior for the sine path).
    pub fn process(
        &self,
        rng: &mut Random,
        envelope: &[f64; NOISE_BANDS],
        re: &mut [f64],
        im: &mut [f64],
        max_bin: Option<usize>,
    ) {
        let n_bins = self.block_size / 2 + 1;
        debug_assert_eq!(re.len(), n_bins);
        debug_assert_eq!(im.len(), n_bins);

        // Absolute-loudness normalization: the smoothing kernel's window energy (Eww)
        // and the block/sample-rate ratio determine how much a unit-magnitude envelope
        // band should contribute to the resynthesized time-domain signal.
        let norm = self.mix_freq / (EWW * self.block_size as f64);
        let scale = norm.max(0.0).sqrt() / 2.0;

        let mut raw_re = vec![0.0f64; n_bins];
        let mut raw_im = vec![0.0f64; n_bins];
        let limit = max_bin.unwrap_or(n_bins).min(n_bins);
        for k in 0..limit {
            let band_mag = self.partition.envelope_at_bin(envelope, k);
            if band_mag <= 0.0 {
                continue;
            }
            let mag = scale * band_mag.sqrt();
            let (c_re, c_im) = rng.random_unit_complex();
            raw_re[k] = mag * c_re;
            raw_im[k] = mag * c_im;
        }

        let kernel = self.window.kernel();
        let half = kernel.len() as isize / 2;
        for k in 0..n_bins {
            let mut acc_re = 0.0;
            let mut acc_im = 0.0;
            for (i, &w) in kernel.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                let src = k as isize + i as isize - half;
                if src < 0 || src as usize >= n_bins {
                    continue;
                }
                let src = src as usize;
                acc_re += w * raw_re[src];
                acc_im += w * raw_im[src];
            }
            re[k] = acc_re;
            im[k] = acc_im;
        }
    }
}
