//! Formant correction: controls how a resynthesized partial's spectral envelope
//! tracks (or doesn't) the change in fundamental frequency during pitch shifting.

use crate::block::AudioBlock;
use crate::random::Random;

/// The maximum cents a harmonic's detune factor may drift from unity per unit of
/// `1/i` (lower harmonics are bounded tighter), expressed as a frequency ratio:
/// `2^(50/1200) - 1`.
pub const MAX_FUZZY_RESYNTH_DELTA: f64 = 0.029_715_88; // 2^(50/1200) - 1, to 8 s.f.

pub const RESYNTH_MAX_PARTIALS: usize = 1000;

/// `(percent*0.01 + 2*(percent*0.01)^2) * 16/3`, converting a user-facing "fuzziness"
/// percentage into the cents bound used to draw each harmonic's detune factor.
const FUZZY_CENTS_SCALE: f64 = 16.0 / 3.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormantMode {
    /// Each partial's magnitude follows it as its frequency shifts with the
    /// fundamental: no formant correction at all.
    Repitch,
    /// Each partial's magnitude is looked up from the *original* (unshifted) spectral
    /// envelope at the partial's shifted frequency, preserving the envelope shape.
    PreserveSpectralEnvelope,
    /// Discards the source partials entirely and resynthesizes a clean harmonic series
    /// at multiples of the source's `env_f0`, with magnitude taken from the spectral
    /// envelope and a slow per-harmonic "fuzzy" detune crossfade so the partials don't
    /// snap to new frequencies on retrigger.
    HarmonicResynthesis,
}

pub struct FormantCorrection {
    mode: FormantMode,
    fuzzy_resynth_cents: f64,
    detune_factors: Vec<f64>,
    next_detune_factors: Vec<f64>,
    fuzzy_frac: f64,
    crossfade_rate_hz: f64,
}

impl FormantCorrection {
    pub fn new(mode: FormantMode) -> FormantCorrection {
        FormantCorrection {
            mode,
            fuzzy_resynth_cents: 0.0,
            detune_factors: Vec::new(),
            next_detune_factors: Vec::new(),
            fuzzy_frac: 0.0,
            crossfade_rate_hz: 8.0,
        }
    }

    pub fn mode(&self) -> FormantMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FormantMode) {
        self.mode = mode;
    }

    /// Sets the harmonic-resynthesis detune fuzziness from a `[0, 100]` percentage.
    pub fn set_fuzzy_resynth(&mut self, percent: f64) {
        let f = percent * 0.01;
        self.fuzzy_resynth_cents = (f + 2.0 * f * f) * FUZZY_CENTS_SCALE;
    }

    /// Resets crossfade state for a freshly retriggered note: draws both detune-factor
    /// sets and a new crossfade rate.
    pub fn retrigger(&mut self, rng: &mut Random) {
        self.fuzzy_frac = 0.0;
        self.detune_factors = gen_detune_factors(RESYNTH_MAX_PARTIALS, self.fuzzy_resynth_cents, rng);
        self.next_detune_factors = gen_detune_factors(RESYNTH_MAX_PARTIALS, self.fuzzy_resynth_cents, rng);
        self.crossfade_rate_hz = rng.random_double_range(6.0, 10.0);
    }

    /// Advances the crossfade by `time_ms` of rendered audio; once the fade completes,
    /// swaps in the waiting detune-factor set, draws a fresh one, and redraws the
    /// crossfade rate. A no-op outside `HarmonicResynthesis`.
    pub fn advance(&mut self, time_ms: f64, rng: &mut Random) {
        if self.mode != FormantMode::HarmonicResynthesis {
            return;
        }
        self.fuzzy_frac += 0.001 * time_ms * self.crossfade_rate_hz;
        if self.fuzzy_frac > 1.0 {
            self.detune_factors = std::mem::replace(
                &mut self.next_detune_factors,
                gen_detune_factors(RESYNTH_MAX_PARTIALS, self.fuzzy_resynth_cents, rng),
            );
            self.crossfade_rate_hz = rng.random_double_range(6.0, 10.0);
            self.fuzzy_frac -= 1.0;
        }
    }

    /// Given the original (unshifted) per-partial `(freq_hz, mag)` pairs from `block`,
    /// a `transpose_factor` applied to all frequencies, and the partials actually being
    /// resynthesized (already transposed), returns the magnitude scale to apply to each
    /// resynthesized partial so its envelope matches `mode`'s policy. Only meaningful
    /// for `Repitch`/`PreserveSpectralEnvelope` — `HarmonicResynthesis` replaces the
    /// partial list outright via `resynth_harmonics` instead.
    pub fn magnitude_scales(
        &self,
        block: &AudioBlock,
        transpose_factor: f64,
        resynth_freqs_hz: &[f64],
        max_freq_hz: f64,
    ) -> Vec<f64> {
        match self.mode {
            FormantMode::Repitch => vec![1.0; resynth_freqs_hz.len()],
            FormantMode::PreserveSpectralEnvelope => {
                let n = block.n_partials();
                if block.env.is_empty() || block.env_f0 <= 0.0 {
                    return vec![1.0; resynth_freqs_hz.len()];
                }

                let mut scales: Vec<f64> = resynth_freqs_hz
                    .iter()
                    .map(|&new_freq| {
                        if new_freq > max_freq_hz {
                            return 0.0;
                        }
                        let orig_freq = new_freq / transpose_factor.max(1e-9);
                        let env_old = env_at(&block.env, block.env_f0, orig_freq);
                        if env_old <= 1e-12 {
                            return 1.0;
                        }
                        let env_new = env_at(&block.env, block.env_f0, new_freq);
                        (env_new / env_old).max(0.0)
                    })
                    .collect();

                let mag_before_sq: f64 = (0..n).map(|i| block.mag_f(i).powi(2)).sum();
                let mag_after_sq: f64 = (0..n.min(scales.len()))
                    .map(|i| (block.mag_f(i) * scales[i]).powi(2))
                    .sum();
                if mag_after_sq > 1e-9 {
                    let norm = (mag_before_sq / mag_after_sq).sqrt();
                    for s in scales.iter_mut() {
                        *s *= norm;
                    }
                }
                scales
            }
            FormantMode::HarmonicResynthesis => vec![1.0; resynth_freqs_hz.len()],
        }
    }

    /// Generates the harmonic series for `HarmonicResynthesis` mode directly from
    /// `block`'s spectral envelope, discarding the source partials. `ratio` is the
    /// pitch-shift factor (`current_freq / fundamental_note_freq`); `max_partials` is
    /// the source block's own partial count, used to size the series the way the
    /// source's own bandwidth would; `max_freq_hz` bounds output frequency (typically
    /// Nyquist).
    pub fn resynth_harmonics(
        &self,
        block: &AudioBlock,
        max_partials: usize,
        ratio: f64,
        max_freq_hz: f64,
    ) -> Vec<(f64, f64)> {
        if block.env.is_empty() || block.env_f0 <= 0.0 {
            return Vec::new();
        }
        let n_harmonics = (((max_partials.max(1) as f64 / ratio.max(1e-9)).round() as usize) + 1)
            .min(RESYNTH_MAX_PARTIALS);

        let mut out = Vec::with_capacity(n_harmonics);
        for i in 1..=n_harmonics {
            let idx = i - 1;
            let d_cur = self.detune_factors.get(idx).copied().unwrap_or(1.0);
            let d_next = self.next_detune_factors.get(idx).copied().unwrap_or(1.0);
            let detune = d_cur * (1.0 - self.fuzzy_frac) + d_next * self.fuzzy_frac;
            let freq = i as f64 * block.env_f0 * detune;
            if freq > max_freq_hz {
                break;
            }
            let mag = env_at(&block.env, block.env_f0, i as f64 * block.env_f0 * ratio);
            out.push((freq, mag));
        }
        out
    }
}

/// Samples the dense per-harmonic-bin spectral-envelope array at absolute frequency
/// `freq_hz`, where `env[k]` corresponds to `k * env_f0` Hz. Extrapolates with the
/// nearest endpoint.
fn env_at(env: &[f64], env_f0: f64, freq_hz: f64) -> f64 {
    if env.is_empty() || env_f0 <= 0.0 {
        return 0.0;
    }
    let pos = freq_hz / env_f0;
    if pos <= 0.0 {
        return env[0];
    }
    let last = env.len() - 1;
    if pos >= last as f64 {
        return env[last];
    }
    let lo = pos.floor() as usize;
    let hi = lo + 1;
    let t = pos - lo as f64;
    env[lo] * (1.0 - t) + env[hi] * t
}

/// Draws `n` per-harmonic detune factors, each uniform within the intersection of a
/// global `fuzzy_resynth_cents` bound and a per-harmonic `1 + MAX_FUZZY_RESYNTH_DELTA/i`
/// bound (lower harmonics are detuned less, since a given cents error is a larger
/// absolute frequency error for them relative to typical formant bandwidths).
fn gen_detune_factors(n: usize, fuzzy_resynth_cents: f64, rng: &mut Random) -> Vec<f64> {
    let fuzzy_high = 2f64.powf(fuzzy_resynth_cents / 1200.0);
    let fuzzy_low = 1.0 / fuzzy_high;
    (1..=n)
        .map(|i| {
            let per_harmonic_bound = 1.0 + MAX_FUZZY_RESYNTH_DELTA / i as f64;
            let hi = fuzzy_high.min(per_harmonic_bound);
            let lo = fuzzy_low.max(1.0 / per_harmonic_bound);
            if hi <= lo {
                1.0
            } else {
                rng.random_double_range(lo, hi)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{sm_factor2idb, sm_freq2ifreq};

    fn make_block(freqs: &[f64], mags: &[f64], fundamental: f64) -> AudioBlock {
        let mut block = AudioBlock::default();
        for (i, &f) in freqs.iter().enumerate() {
            block.freqs.push(sm_freq2ifreq(f / fundamental));
            block.mags.push(sm_factor2idb(mags[i]));
        }
        block
    }

    fn with_envelope(mut block: AudioBlock, env_f0: f64, env: Vec<f64>) -> AudioBlock {
        block.env_f0 = env_f0;
        block.env = env;
        block
    }

    #[test]
    fn repitch_mode_leaves_scales_at_one() {
        let block = make_block(&[440.0, 880.0], &[1.0, 0.5], 440.0);
        let fc = FormantCorrection::new(FormantMode::Repitch);
        let scales = fc.magnitude_scales(&block, 2.0, &[880.0, 1760.0], 24000.0);
        assert_eq!(scales, vec![1.0, 1.0]);
    }

    #[test]
    fn preserve_envelope_tracks_original_shape() {
        let block = make_block(&[440.0, 880.0, 1320.0], &[1.0, 0.5, 0.25], 440.0);
        let block = with_envelope(block, 440.0, vec![1.0, 1.0, 0.5, 0.5, 0.25, 0.25]);
        let fc = FormantCorrection::new(FormantMode::PreserveSpectralEnvelope);
        // Transpose up an octave; pre-shift frequency for 880 Hz output is 440 Hz.
        let scales = fc.magnitude_scales(&block, 2.0, &[880.0], 24000.0);
        assert_eq!(scales.len(), 1);
        assert!(scales[0] > 0.0);
    }

    #[test]
    fn preserve_envelope_drops_partials_past_max_freq() {
        let block = make_block(&[440.0], &[1.0], 440.0);
        let block = with_envelope(block, 440.0, vec![1.0, 1.0]);
        let fc = FormantCorrection::new(FormantMode::PreserveSpectralEnvelope);
        let scales = fc.magnitude_scales(&block, 2.0, &[30_000.0], 24000.0);
        assert_eq!(scales[0], 0.0);
    }

    #[test]
    fn harmonic_resynthesis_places_harmonics_at_env_f0_multiples() {
        let block = with_envelope(AudioBlock::default(), 220.0, vec![1.0, 0.8, 0.6, 0.4, 0.2]);
        let mut fc = FormantCorrection::new(FormantMode::HarmonicResynthesis);
        let mut rng = Random::new();
        rng.set_seed(1);
        fc.retrigger(&mut rng);
        let harmonics = fc.resynth_harmonics(&block, 3, 1.0, 24000.0);
        assert!(!harmonics.is_empty());
        for (i, &(freq, mag)) in harmonics.iter().enumerate() {
            let expected = (i + 1) as f64 * 220.0;
            assert!((freq - expected).abs() / expected < 0.05, "harmonic {i}: freq={freq}");
            assert!(mag >= 0.0);
        }
    }

    #[test]
    fn advance_wraps_fuzzy_frac_and_swaps_detune_sets() {
        let mut fc = FormantCorrection::new(FormantMode::HarmonicResynthesis);
        fc.set_fuzzy_resynth(50.0);
        let mut rng = Random::new();
        rng.set_seed(2);
        fc.retrigger(&mut rng);
        let before = fc.detune_factors.clone();
        fc.crossfade_rate_hz = 100.0; // force a fast wrap for the test
        fc.advance(15.0, &mut rng); // 0.001*15*100 = 1.5 > 1.0: triggers exactly one swap
        assert!(fc.fuzzy_frac < 1.0);
        assert_ne!(fc.detune_factors, before);
    }
}
