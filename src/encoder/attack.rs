//! Attack envelope optimization: a staged randomized local search over
//! `(attack_start_ms, attack_end_ms)`, seeded for determinism.

use crate::random::Random;

const SEED: u64 = 42;
const RADII: [f64; 6] = [100.0, 20.0, 1.0, 0.2, 0.01, 0.002];
const STAGE_THRESHOLDS: [u32; 6] = [500, 1000, 1500, 2000, 2500, u32::MAX];
const MAX_STALL: u32 = 3000;

#[derive(Clone, Copy, Debug)]
pub struct AttackParams {
    pub attack_start_ms: f64,
    pub attack_end_ms: f64,
}

/// One analyzed frame's data needed to evaluate the attack-envelope objective:
/// the phase-optimal unscaled reconstruction and its time offset/length in samples.
pub struct AttackFrame {
    pub unscaled_signal: Vec<f64>,
    pub frame_start_sample: i64,
    pub samples_in_frame: i64,
}

/// Sum-of-squared error between the attack-enveloped reconstruction and the true
/// original samples, with per-frame boundary compensation. Also returns the per-frame
/// envelope scale actually applied (used to rescale magnitudes once a winner is found).
pub fn attack_error(
    frames: &[AttackFrame],
    original: &[f32],
    mix_freq: f64,
    params: AttackParams,
) -> (f64, Vec<f64>) {
    let mut total_error = 0.0;
    let mut scales = Vec::with_capacity(frames.len());

    for frame in frames {
        let len = frame.unscaled_signal.len() as i64;
        let scale = if frame.samples_in_frame < len / 8 {
            0.0
        } else {
            frame.samples_in_frame as f64 / len as f64
        };

        let mut frame_error = 0.0;
        let mut env_integral = 0.0;
        let mut env_count = 0usize;
        for (i, &s) in frame.unscaled_signal.iter().enumerate() {
            let sample_pos = frame.frame_start_sample + i as i64;
            if sample_pos < 0 || sample_pos as usize >= original.len() {
                continue;
            }
            let time_ms = sample_pos as f64 * 1000.0 / mix_freq;
            let env = if time_ms < params.attack_start_ms {
                0.0
            } else if time_ms < params.attack_end_ms {
                (time_ms - params.attack_start_ms) / (params.attack_end_ms - params.attack_start_ms)
            } else {
                1.0
            };
            let decoded = s * env * scale;
            let orig = original[sample_pos as usize] as f64;
            frame_error += (orig - decoded) * (orig - decoded);
            env_integral += env;
            env_count += 1;
        }
        total_error += frame_error;
        scales.push(if env_count > 0 {
            scale * env_integral / env_count as f64
        } else {
            0.0
        });
    }
    (total_error, scales)
}

/// Runs the staged randomized local search and returns the winning parameters plus the
/// per-frame magnitude scale to apply.
pub fn compute_attack_params(
    frames: &[AttackFrame],
    original: &[f32],
    mix_freq: f64,
) -> (AttackParams, Vec<f64>) {
    let mut rng = Random::new();
    rng.set_seed(SEED);

    let mut best = AttackParams {
        attack_start_ms: 0.0,
        attack_end_ms: 20.0,
    };
    let (mut best_error, mut best_scales) = attack_error(frames, original, mix_freq, best);

    let mut radius_idx = 0;
    let mut non_improving = 0u32;
    let mut total_stall = 0u32;

    while radius_idx < RADII.len() && total_stall < MAX_STALL {
        let r = RADII[radius_idx];
        let mut candidate = best;
        candidate.attack_start_ms = (candidate.attack_start_ms + rng.random_double_range(-r, r)).max(0.0);
        candidate.attack_end_ms += rng.random_double_range(-r, r);
        if candidate.attack_end_ms < candidate.attack_start_ms + 5.0 {
            candidate.attack_end_ms = candidate.attack_start_ms + 5.0;
        }
        if candidate.attack_end_ms >= 200.0 {
            candidate.attack_end_ms = 199.999;
        }

        let (error, scales) = attack_error(frames, original, mix_freq, candidate);
        if error < best_error {
            best_error = error;
            best = candidate;
            best_scales = scales;
            non_improving = 0;
        } else {
            non_improving += 1;
            total_stall += 1;
        }

        while radius_idx < STAGE_THRESHOLDS.len() && non_improving >= STAGE_THRESHOLDS[radius_idx] {
            radius_idx += 1;
            non_improving = 0;
        }
    }

    (best, best_scales)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_to_low_error_for_clean_onset() {
        let mix_freq = 48000.0;
        let frame_len = 512;
        let true_start = 3.0;
        let true_end = 15.0;
        let n_frames = 6;
        let mut original = vec![0.0f32; frame_len * n_frames];
        for (i, s) in original.iter_mut().enumerate() {
            let time_ms = i as f64 * 1000.0 / mix_freq;
            let env = if time_ms < true_start {
                0.0
            } else if time_ms < true_end {
                (time_ms - true_start) / (true_end - true_start)
            } else {
                1.0
            };
            *s = env as f32;
        }
        let frames: Vec<AttackFrame> = (0..n_frames)
            .map(|f| AttackFrame {
                unscaled_signal: vec![1.0; frame_len],
                frame_start_sample: (f * frame_len) as i64,
                samples_in_frame: frame_len as i64,
            })
            .collect();
        let (params, scales) = compute_attack_params(&frames, &original, mix_freq);
        assert!(params.attack_end_ms - params.attack_start_ms >= 5.0);
        assert_eq!(scales.len(), n_frames);
    }
}
