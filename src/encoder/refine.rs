//! Sinusoidal refinement (`refine_sine_params_fast`) and spectral subtraction.

use crate::window::WindowType;

/// One frame's worth of float-valued partials being refined in place.
pub struct RefinablePartials {
    pub freqs: Vec<f64>,
    pub mags: Vec<f64>,
    pub phases: Vec<f64>,
}

/// Greedily refines each partial's (mag, phase) via a windowed inner product of the
/// residual signal against the partial's exact frequency, correcting for the window's
/// mirror term. `signal` is the frame's original (windowed-domain) samples, indexed
/// `0..frame_size`; `mix_freq`/`window` describe the analysis window used.
pub fn refine_sine_params_fast(
    signal: &[f64],
    window: WindowType,
    mix_freq: f64,
    partials: &mut RefinablePartials,
) {
    let frame_size = signal.len();
    let mut win = vec![0.0; frame_size];
    crate::window::fill_window(window, &mut win);
    let window_weight: f64 = win.iter().sum();

    let center_offset = (frame_size as f64 - 1.0) / 2.0;

    // "all sines" running reconstruction, ADD mode.
    let mut all_sines = vec![0.0f64; frame_size];
    for i in 0..partials.freqs.len() {
        add_sine(&mut all_sines, partials.freqs[i], partials.mags[i], partials.phases[i], mix_freq);
    }

    let n = partials.freqs.len();
    let mut remaining: Vec<bool> = vec![true; n];

    loop {
        // find loudest remaining partial
        let mut best = None;
        let mut best_mag = 0.0;
        for i in 0..n {
            if remaining[i] && partials.mags[i] > best_mag {
                best_mag = partials.mags[i];
                best = Some(i);
            }
        }
        let Some(i) = best else { break };
        remaining[i] = false;
        if best_mag <= 0.0 {
            break;
        }

        let freq = partials.freqs[i];

        // residual = original - all_sines + this partial's own contribution
        let mut own = vec![0.0f64; frame_size];
        add_sine(&mut own, freq, partials.mags[i], partials.phases[i], mix_freq);

        let omega = std::f64::consts::TAU * freq / mix_freq;
        let mut x_re = 0.0;
        let mut x_im = 0.0;
        let mut w2_re = 0.0;
        let mut w2_im = 0.0;
        for t in 0..frame_size {
            let residual = signal[t] - all_sines[t] + own[t];
            let phase_ref = omega * (t as f64 - center_offset);
            x_re += residual * win[t] * phase_ref.cos();
            x_im += residual * win[t] * phase_ref.sin();
            let phase2 = 2.0 * omega * (t as f64 - center_offset) + std::f64::consts::FRAC_PI_2;
            w2_re += win[t] * phase2.cos();
            w2_im += win[t] * phase2.sin();
        }
        let _ = w2_im;
        let w2omega = w2_re;

        let denom_re = window_weight + w2omega;
        let denom_im = window_weight - w2omega;
        let x_re = if denom_re.abs() > 1e-12 { x_re * 2.0 / denom_re } else { 0.0 };
        let x_im = if denom_im.abs() > 1e-12 { x_im * 2.0 / denom_im } else { 0.0 };

        let mag = (x_re * x_re + x_im * x_im).sqrt();
        let mut phase = x_im.atan2(x_re) + std::f64::consts::FRAC_PI_2;
        phase -= omega * center_offset;
        phase = phase.rem_euclid(std::f64::consts::TAU);

        // subtract old contribution, inject refined one
        for t in 0..frame_size {
            all_sines[t] -= own[t];
        }
        partials.mags[i] = mag;
        partials.phases[i] = phase;
        add_sine(&mut all_sines, freq, mag, phase, mix_freq);
    }
}

fn add_sine(out: &mut [f64], freq: f64, mag: f64, phase: f64, mix_freq: f64) {
    let omega = std::f64::consts::TAU * freq / mix_freq;
    for (t, o) in out.iter_mut().enumerate() {
        *o += mag * (omega * t as f64 + phase).sin();
    }
}

/// `remove_small_partials`: computes an octave-distance masking score for documentation
/// and testability, but — matching the original engine's commented-out removal line —
/// never actually removes a partial. Only zero-magnitude partials are dropped, later,
/// at the sort step.
pub fn small_partial_mask_db(octaves_away: f64) -> f64 {
    -30.0 - 15.0 * octaves_away
}

pub fn should_remove_small_partial(_mag_db: f64, _mask_db: f64) -> bool {
    false
}

/// Synthesizes the sine model in the time domain, FFTs it, and subtracts its
/// magnitude from the original spectrum's magnitude (clamped >= 0), preserving phase.
/// `orig_re`/`orig_im` are overwritten in place with the residual ("noise") spectrum.
pub fn spectral_subtract(
    frame_size: usize,
    block_size: usize,
    window: WindowType,
    mix_freq: f64,
    partials: &RefinablePartials,
    orig_re: &mut [f64],
    orig_im: &mut [f64],
) {
    let mut sines = vec![0.0f64; frame_size];
    for i in 0..partials.freqs.len() {
        add_sine(&mut sines, partials.freqs[i], partials.mags[i], partials.phases[i], mix_freq);
    }
    let mut win = vec![0.0; frame_size];
    crate::window::fill_window(window, &mut win);
    for (s, w) in sines.iter_mut().zip(win.iter()) {
        *s *= w;
    }

    let mut buf = vec![0.0f32; block_size];
    // odd-centered placement, matching the encoder's STFT framing.
    let half = frame_size / 2;
    for i in 0..half {
        buf[block_size - half + i] = sines[i] as f32;
    }
    for i in half..frame_size {
        buf[i - half] = sines[i] as f32;
    }
    let mut packed = vec![0.0f32; block_size];
    crate::fft::fftar(&buf, &mut packed);

    let n = block_size / 2 + 1;
    let mut sub_re = vec![0.0f64; n];
    let mut sub_im = vec![0.0f64; n];
    sub_re[0] = packed[0] as f64;
    sub_re[block_size / 2] = packed[1] as f64;
    for k in 1..block_size / 2 {
        sub_re[k] = packed[2 * k] as f64;
        sub_im[k] = packed[2 * k + 1] as f64;
    }

    for k in 0..n.min(orig_re.len()) {
        let sub_mag = (sub_re[k] * sub_re[k] + sub_im[k] * sub_im[k]).sqrt();
        let orig_mag = (orig_re[k] * orig_re[k] + orig_im[k] * orig_im[k]).sqrt();
        let mag_after = (orig_mag - sub_mag).max(0.0);
        let scale = if orig_mag > 1e-12 { mag_after / orig_mag } else { 0.0 };
        orig_re[k] *= scale;
        orig_im[k] *= scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refine_preserves_loud_partial_magnitude_roughly() {
        let frame_size = 512;
        let mix_freq = 48000.0;
        let freq = 440.0;
        let mag = 0.5;
        let mut signal = vec![0.0; frame_size];
        let omega = std::f64::consts::TAU * freq / mix_freq;
        for (t, s) in signal.iter_mut().enumerate() {
            *s = mag * (omega * t as f64).sin();
        }
        let mut partials = RefinablePartials {
            freqs: vec![freq],
            mags: vec![mag * 0.8],
            phases: vec![0.1],
        };
        refine_sine_params_fast(&signal, WindowType::Hann, mix_freq, &mut partials);
        assert!((partials.mags[0] - mag).abs() < 0.05, "mag={}", partials.mags[0]);
    }

    #[test]
    fn spectral_subtraction_reduces_energy_at_partial_bin() {
        let frame_size = 256;
        let block_size = 256;
        let mix_freq = 256.0;
        let freq = 20.0;
        let mut samples = vec![0.0f64; frame_size];
        let omega = std::f64::consts::TAU * freq / mix_freq;
        for (t, s) in samples.iter_mut().enumerate() {
            *s = (omega * t as f64).sin();
        }
        let samples_f32: Vec<f32> = samples.iter().map(|&x| x as f32).collect();
        let mut packed = vec![0.0f32; block_size];
        crate::fft::fftar(&samples_f32, &mut packed);
        let n = block_size / 2 + 1;
        let mut re = vec![0.0; n];
        let mut im = vec![0.0; n];
        re[0] = packed[0] as f64;
        re[block_size / 2] = packed[1] as f64;
        for k in 1..block_size / 2 {
            re[k] = packed[2 * k] as f64;
            im[k] = packed[2 * k + 1] as f64;
        }
        let orig_energy: f64 = re.iter().zip(im.iter()).map(|(r, i)| r * r + i * i).sum();

        let partials = RefinablePartials {
            freqs: vec![freq],
            mags: vec![1.0],
            phases: vec![0.0],
        };
        spectral_subtract(frame_size, block_size, WindowType::Hann, mix_freq, &partials, &mut re, &mut im);
        let residual_energy: f64 = re.iter().zip(im.iter()).map(|(r, i)| r * r + i * i).sum();
        assert!(residual_energy < orig_energy * 0.5);
    }
}
