//! Mel-band residual noise envelope, computed from the spectral-subtraction residual.

use crate::block::NOISE_BANDS;

#[inline]
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

fn band_range(band: usize) -> (f64, f64) {
    let mel_low = 30.0 + 4000.0 * band as f64 / NOISE_BANDS as f64;
    let mel_high = 30.0 + 4000.0 * (band + 1) as f64 / NOISE_BANDS as f64;
    (mel_to_hz(mel_low), mel_to_hz(mel_high))
}

/// Accumulate the residual spectrum's per-bin energy into 32 mel bands and return the
/// per-band RMS-like magnitude envelope.
pub fn approximate_noise_spectrum(re: &[f64], im: &[f64], mix_freq: f64, norm: f64) -> [f64; NOISE_BANDS] {
    let n_bins = re.len(); // block_size/2 + 1
    let block_size = (n_bins - 1) * 2;
    let mut energy = [0.0f64; NOISE_BANDS];
    let mut count = [0usize; NOISE_BANDS];

    let (band0_low, _) = band_range(0);

    for k in 0..n_bins {
        let hz = k as f64 * mix_freq / block_size as f64;
        if hz < band0_low {
            continue;
        }
        let mut assigned = None;
        for b in 0..NOISE_BANDS {
            let (low, high) = band_range(b);
            if hz >= low && hz < high {
                assigned = Some(b);
                break;
            }
        }
        let Some(b) = assigned else { continue };
        let mag2 = re[k] * re[k] + im[k] * im[k];
        energy[b] += mag2;
        count[b] += 1;
    }

    let mut envelope = [0.0f64; NOISE_BANDS];
    for b in 0..NOISE_BANDS {
        if count[b] > 0 {
            envelope[b] = (energy[b] / norm / count[b] as f64).max(0.0).sqrt();
        }
    }
    envelope
}

/// Drives the full noise-envelope computation for one frame: applies the sqrt(2)
/// DC/Nyquist scaling, computes `norm`, and bands the residual spectrum.
pub fn approx_noise(re: &mut [f64], im: &mut [f64], window_sum_sq: f64, mix_freq: f64) -> [f64; NOISE_BANDS] {
    let n = re.len();
    re[0] *= std::f64::consts::SQRT_2;
    if n >= 2 {
        re[n - 1] *= std::f64::consts::SQRT_2;
    }
    let norm = 0.5 * mix_freq * window_sum_sq;
    approximate_noise_spectrum(re, im, mix_freq, norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_to_hz_zero_is_zero() {
        assert!((mel_to_hz(0.0)).abs() < 1e-9);
    }

    #[test]
    fn flat_noise_spreads_across_bands() {
        let n_bins = 1025;
        let re = vec![1.0; n_bins];
        let im = vec![0.0; n_bins];
        let envelope = approximate_noise_spectrum(&re, &im, 48000.0, 1.0);
        let nonzero = envelope.iter().filter(|&&v| v > 0.0).count();
        assert!(nonzero > NOISE_BANDS / 2);
    }

    #[test]
    fn silent_spectrum_yields_zero_envelope() {
        let n_bins = 513;
        let re = vec![0.0; n_bins];
        let im = vec![0.0; n_bins];
        let envelope = approximate_noise_spectrum(&re, &im, 48000.0, 1.0);
        assert!(envelope.iter().all(|&v| v == 0.0));
    }
}
