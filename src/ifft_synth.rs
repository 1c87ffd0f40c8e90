//! Per-partial windowed spectrum rendering for the IFFT-based sines synthesizer.
//!
//! The idea (shared with the original engine's `IFFTSynthTable`): rather than run one
//! sine oscillator per partial in the time domain, each partial's contribution to the
//! current output block is rendered directly into a shared frequency-domain spectrum
//! (by adding a small number of bins shaped by the analysis window's own transform),
//! and the whole block is synthesized with a single inverse FFT. The window's transform
//! only has significant energy in a handful of bins around a partial's center frequency,
//! so each partial touches `WIN_TRANS_LEN` complex bins rather than `block_size` samples.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const ZERO_PADDING: usize = 256;
const WIN_TRANS_LEN: usize = 9;
const SIN_TABLE_SIZE: usize = 4096;

/// Per-`block_size` table: the analysis window's own transform, sampled at
/// `ZERO_PADDING`-fold frequency oversampling around each of the `WIN_TRANS_LEN`
/// neighboring bins, plus a time-domain `win_scale` ratio that retargets the
/// Blackman-Harris-92 analysis window this table is built from onto the decoder's
/// Hann-shaped overlap-add synthesis window.
struct WinTrans {
    /// `table[freq_frac * WIN_TRANS_LEN + k]`, `freq_frac in 0..ZERO_PADDING`, `k in
    /// 0..WIN_TRANS_LEN`. Entries are the window transform's signed real value (not a
    /// magnitude) at `k - WIN_TRANS_LEN/2` bins away from the quantized frequency;
    /// sign matters; the BH92 transform's sidelobes alternate sign.
    table: Vec<f64>,
    /// `win_scale[i] = window_cos(x) / blackman_harris_92(x)` for the `i`-th
    /// time-domain output sample, index-rotated by half a block to match the engine's
    /// odd-centered buffer layout.
    win_scale: Vec<f64>,
}

fn build_win_trans(block_size: usize) -> WinTrans {
    let zp = ZERO_PADDING;
    let n = block_size * zp;
    let half = block_size / 2;

    // Place a Blackman-Harris-92 window of length `block_size` into a zero-padded
    // buffer of length `n`, wrapped around the origin (the second half of the window
    // goes at the buffer's start, the first half at its end) so the window is
    // centered on sample 0 rather than on `block_size/2`; this makes its FFT purely
    // real (zero phase), which is what lets the table below store signed real values
    // directly instead of discarding phase by taking a magnitude.
    let mut win = vec![0.0f32; n];
    for i in 0..block_size {
        let x = if i < half {
            (half - i) as f64 / block_size as f64 * 2.0 - 1.0
        } else {
            (i - half) as f64 / block_size as f64 * 2.0 - 1.0
        };
        let w = crate::window::blackman_harris_92(x) as f32;
        if i < half {
            win[i] = w;
        } else {
            win[n - block_size + i] = w;
        }
    }

    let mut packed = vec![0.0f32; n];
    crate::fft::fftar(&win, &mut packed);

    let range: i64 = WIN_TRANS_LEN as i64 / 2;
    let mut table = vec![0.0f64; zp * WIN_TRANS_LEN];
    for freq_frac in 0..zp {
        for (k, i) in (-range..=range).enumerate() {
            let pos = i * zp as i64 - freq_frac as i64;
            let bin = pos.unsigned_abs() as usize;
            let re = if bin == 0 { packed[0] } else { packed[2 * bin] };
            table[freq_frac * WIN_TRANS_LEN + k] = re as f64;
        }
    }
    let peak = table.iter().cloned().fold(0.0f64, |a, v| a.max(v.abs())).max(1e-30);
    for v in table.iter_mut() {
        *v /= peak;
    }

    let mut win_scale = vec![0.0f64; block_size];
    for i in 0..block_size {
        let x = 2.0 * i as f64 / block_size as f64 - 1.0;
        let bh92 = crate::window::blackman_harris_92(x);
        let cos_w = crate::window::cos_window(x);
        let idx = (i + half) % block_size;
        win_scale[idx] = if bh92.abs() > 1e-9 { cos_w / bh92 } else { 0.0 };
    }

    WinTrans { table, win_scale }
}

static WIN_TRANS_CACHE: Lazy<Mutex<HashMap<usize, Arc<WinTrans>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn win_trans_for(block_size: usize) -> Arc<WinTrans> {
    let mut cache = WIN_TRANS_CACHE.lock().unwrap();
    cache
        .entry(block_size)
        .or_insert_with(|| Arc::new(build_win_trans(block_size)))
        .clone()
}

/// Multiplies `samples` (one block's raw inverse-FFT time-domain output, not yet
/// half-swapped) elementwise by the `block_size`-length `win_scale` array, retargeting
/// the BH92-table-domain result onto the decoder's Hann synthesis window.
pub fn apply_win_scale(block_size: usize, samples: &mut [f32]) {
    let wt = win_trans_for(block_size);
    for (s, &w) in samples.iter_mut().zip(wt.win_scale.iter()) {
        *s *= w as f32;
    }
}

struct SinTable {
    table: Vec<f64>,
}

static SIN_TABLE: Lazy<SinTable> = Lazy::new(|| {
    let mut table = vec![0.0; SIN_TABLE_SIZE + 1];
    for (i, t) in table.iter_mut().enumerate() {
        *t = (std::f64::consts::TAU * i as f64 / SIN_TABLE_SIZE as f64).sin();
    }
    SinTable { table }
});

#[inline]
fn fast_sin(phase: f64) -> f64 {
    let t = &SIN_TABLE.table;
    let frac = phase.rem_euclid(std::f64::consts::TAU) / std::f64::consts::TAU * SIN_TABLE_SIZE as f64;
    let i0 = frac.floor() as usize % SIN_TABLE_SIZE;
    let i1 = (i0 + 1) % SIN_TABLE_SIZE;
    let w = frac - frac.floor();
    t[i0] * (1.0 - w) + t[i1] * w
}

#[inline]
fn fast_cos(phase: f64) -> f64 {
    fast_sin(phase + std::f64::consts::FRAC_PI_2)
}

/// Quantizes a continuous frequency-in-bins value to the nearest `1/ZERO_PADDING`th of
/// a bin, matching the resolution of the precomputed window-transform table.
pub fn quantized_freq(freq_in_bins: f64) -> f64 {
    (freq_in_bins * ZERO_PADDING as f64).round() / ZERO_PADDING as f64
}

/// Output mode for `render_partial`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Replace,
    Add,
}

/// Renders one partial's contribution into `spectrum` (packed `re[0..=n/2]`/`im[0..=n/2]`
/// arrays of length `block_size/2 + 1`). `freq_in_bins` is the partial's frequency
/// expressed in FFT bins (`freq_hz * block_size / mix_freq`); `mag`/`phase` are its
/// linear magnitude and radian phase at the block's time origin. `block_size` selects
/// the cached window-transform table (the table depends on the analysis window's
/// length, which is the live decoder's render block size).
pub fn render_partial(
    re: &mut [f64],
    im: &mut [f64],
    block_size: usize,
    freq_in_bins: f64,
    mag: f64,
    phase: f64,
    mode: RenderMode,
) {
    let n_bins = re.len();
    let freq256 = (freq_in_bins * ZERO_PADDING as f64).round() as i64;
    let base_bin = freq256.div_euclid(ZERO_PADDING as i64);
    let freq_frac = freq256.rem_euclid(ZERO_PADDING as i64) as usize;

    let wt = win_trans_for(block_size);
    let coeffs = &wt.table[freq_frac * WIN_TRANS_LEN..(freq_frac + 1) * WIN_TRANS_LEN];

    let re_phase = mag * fast_cos(phase);
    let im_phase = mag * fast_sin(phase);

    let range: i64 = WIN_TRANS_LEN as i64 / 2;
    for (k, &coeff) in coeffs.iter().enumerate() {
        let i = k as i64 - range;
        let bin = base_bin + i;
        if bin < 0 || bin as usize >= n_bins {
            continue;
        }
        let bin = bin as usize;
        let re_v = re_phase * coeff;
        let im_v = im_phase * coeff;
        match mode {
            RenderMode::Replace => {
                re[bin] = re_v;
                im[bin] = im_v;
            }
            RenderMode::Add => {
                re[bin] += re_v;
                im[bin] += im_v;
            }
        }
    }
}

/// Accumulates many partials into one spectrum; `partials` is `(freq_in_bins, mag,
/// phase)` triples.
pub fn add_partials(re: &mut [f64], im: &mut [f64], block_size: usize, partials: &[(f64, f64, f64)]) {
    re.fill(0.0);
    im.fill(0.0);
    for &(freq, mag, phase) in partials {
        render_partial(re, im, block_size, freq, mag, phase, RenderMode::Add);
    }
}

/// A process-wide cache of scratch spectra keyed by block size, used by the live
/// decoder to avoid per-block heap allocation on the audio thread after warm-up.
static SCRATCH: Lazy<Mutex<std::collections::HashMap<usize, (Vec<f64>, Vec<f64>)>>> =
    Lazy::new(|| Mutex::new(std::collections::HashMap::new()));

pub fn precompute_tables(block_size: usize) {
    let _ = win_trans_for(block_size);
    Lazy::force(&SIN_TABLE);
    let mut cache = SCRATCH.lock().unwrap();
    cache
        .entry(block_size)
        .or_insert_with(|| (vec![0.0; block_size / 2 + 1], vec![0.0; block_size / 2 + 1]));
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BLOCK_SIZE: usize = 128;

    #[test]
    fn render_partial_concentrates_near_center_bin() {
        let n_bins = TEST_BLOCK_SIZE / 2 + 1;
        let mut re = vec![0.0; n_bins];
        let mut im = vec![0.0; n_bins];
        render_partial(&mut re, &mut im, TEST_BLOCK_SIZE, 10.0, 1.0, 0.0, RenderMode::Replace);
        let energy: f64 = re.iter().zip(im.iter()).map(|(r, i)| r * r + i * i).sum();
        let near_center: f64 = (6..=14).map(|b| re[b] * re[b] + im[b] * im[b]).sum();
        assert!(near_center / energy > 0.95, "ratio={}", near_center / energy);
    }

    #[test]
    fn quantized_freq_is_idempotent() {
        let q = quantized_freq(12.3);
        assert!((quantized_freq(q) - q).abs() < 1e-9);
    }

    #[test]
    fn add_partials_accumulates_distinct_partials() {
        let n_bins = TEST_BLOCK_SIZE / 2 + 1;
        let mut re = vec![0.0; n_bins];
        let mut im = vec![0.0; n_bins];
        add_partials(&mut re, &mut im, TEST_BLOCK_SIZE, &[(10.0, 1.0, 0.0), (30.0, 1.0, 0.0)]);
        let energy_10: f64 = (6..=14).map(|b| re[b] * re[b] + im[b] * im[b]).sum();
        let energy_30: f64 = (26..=34).map(|b| re[b] * re[b] + im[b] * im[b]).sum();
        assert!(energy_10 > 0.1 && energy_30 > 0.1);
    }

    #[test]
    fn win_scale_is_finite_and_block_size_length() {
        let wt = win_trans_for(TEST_BLOCK_SIZE);
        assert_eq!(wt.win_scale.len(), TEST_BLOCK_SIZE);
        assert!(wt.win_scale.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn fast_sin_matches_std_sin_roughly() {
        let mut x: f64 = 0.0;
        while x < std::f64::consts::TAU {
            assert!((fast_sin(x) - x.sin()).abs() < 0.01, "x={x}");
            x += 0.31;
        }
    }
}
