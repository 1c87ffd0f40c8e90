//! Offline analysis pipeline: STFT -> peak detection -> partial linking -> validation
//! -> sinusoidal refinement -> spectral subtraction -> mel-band noise envelope ->
//! attack-envelope fitting -> sort/quantize.

mod attack;
mod noise;
mod peaks;
mod refine;

use crate::block::{Audio, AudioBlock, EncoderBlock, LoopType};
use crate::window::WindowType;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct EncoderParams {
    pub mix_freq: f64,
    pub fundamental_freq: f64,
    pub frame_size_ms: f64,
    pub frame_step_ms: f64,
    pub zeropad: usize,
    pub enable_phases: bool,
    pub window: WindowType,
    pub peak_width: f64,
    pub min_frame_periods: f64,
    pub min_frame_size_ms: f64,
}

impl Default for EncoderParams {
    fn default() -> Self {
        EncoderParams {
            mix_freq: 48000.0,
            fundamental_freq: 440.0,
            frame_size_ms: 40.0,
            frame_step_ms: 10.0,
            zeropad: 4,
            enable_phases: true,
            window: WindowType::BlackmanHarris92,
            peak_width: 2.9,
            min_frame_periods: 4.0,
            min_frame_size_ms: 40.0,
        }
    }
}

impl EncoderParams {
    pub fn validate(&self) -> Result<()> {
        if self.fundamental_freq <= 0.0 {
            return Err(Error::invalid_parameter("fundamental_freq must be positive"));
        }
        if self.mix_freq <= 0.0 {
            return Err(Error::invalid_parameter("mix_freq must be positive"));
        }
        if self.frame_step_ms > self.frame_size_ms {
            return Err(Error::invalid_parameter("frame_step_ms must be <= frame_size_ms"));
        }
        if !self.zeropad.is_power_of_two() {
            return Err(Error::invalid_parameter("zeropad must be a power of two"));
        }
        Ok(())
    }

    /// Ensures `frame_size_ms` covers at least `min_frame_periods` periods of the
    /// fundamental and at least `min_frame_size_ms` milliseconds.
    pub fn effective_frame_size_ms(&self) -> f64 {
        let period_ms = 1000.0 / self.fundamental_freq;
        self.frame_size_ms
            .max(period_ms * self.min_frame_periods)
            .max(self.min_frame_size_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptLevel {
    None,
    Refine,
    RefineMore,
}

pub struct Encoder {
    params: EncoderParams,
    audio_blocks: Vec<AudioBlock>,
    loop_type: LoopType,
    loop_start: usize,
    loop_end: usize,
    zero_values_at_start: usize,
    sample_count: usize,
    attack_start_ms: f64,
    attack_end_ms: f64,
}

fn smallest_pow2(n: usize) -> usize {
    n.next_power_of_two()
}

impl Encoder {
    pub fn new(params: EncoderParams) -> Result<Encoder> {
        params.validate()?;
        Ok(Encoder {
            params,
            audio_blocks: Vec::new(),
            loop_type: LoopType::None,
            loop_start: 0,
            loop_end: 0,
            zero_values_at_start: 0,
            sample_count: 0,
            attack_start_ms: 0.0,
            attack_end_ms: 0.0,
        })
    }

    pub fn set_loop(&mut self, loop_type: LoopType, start: usize, end: usize) {
        self.loop_type = loop_type;
        self.loop_start = start;
        self.loop_end = end;
    }

    pub fn set_loop_seconds(&mut self, loop_type: LoopType, start_s: f64, end_s: f64) {
        let step_s = self.params.frame_step_ms / 1000.0;
        self.set_loop(loop_type, (start_s / step_s).round() as usize, (end_s / step_s).round() as usize);
    }

    /// Runs the full analysis pipeline over `samples` (mono, at `params.mix_freq`).
    pub fn encode(&mut self, samples: &[f32], opt_level: OptLevel, do_attack: bool) -> Result<()> {
        let frame_size_ms = self.params.effective_frame_size_ms();
        let frame_size = (frame_size_ms * 0.001 * self.params.mix_freq).round() as usize;
        let frame_step = (self.params.frame_step_ms * 0.001 * self.params.mix_freq).round() as usize;
        let block_size = smallest_pow2(frame_size) * self.params.zeropad;

        self.zero_values_at_start = frame_size - frame_step / 2;
        self.sample_count = samples.len();

        // 1. deinterleave + prepend zeros
        let mut padded = vec![0.0f32; self.zero_values_at_start + samples.len()];
        padded[self.zero_values_at_start..].copy_from_slice(samples);

        let n_frames = if padded.len() > frame_size {
            (padded.len() - frame_size) / frame_step + 1
        } else {
            1
        };

        let mut window_buf = vec![0.0; frame_size];
        crate::window::fill_window(self.params.window, &mut window_buf);
        let window_weight: f64 = window_buf.iter().sum();
        let window_weight_sq: f64 = window_buf.iter().map(|w| w * w).sum();

        // 2. STFT: gather per-frame complex spectra + time-domain windowed signals.
        let mut frame_re = Vec::with_capacity(n_frames);
        let mut frame_im = Vec::with_capacity(n_frames);
        let mut frame_signals = Vec::with_capacity(n_frames);

        for f in 0..n_frames {
            let start = f * frame_step;
            let mut windowed = vec![0.0f64; frame_size];
            for i in 0..frame_size {
                let sample = padded.get(start + i).copied().unwrap_or(0.0) as f64;
                windowed[i] = sample * window_buf[i];
            }

            let mut buf = vec![0.0f32; block_size];
            let half = frame_size / 2;
            for i in 0..half {
                buf[block_size - half + i] = windowed[i] as f32;
            }
            for i in half..frame_size {
                buf[i - half] = windowed[i] as f32;
            }
            let mut packed = vec![0.0f32; block_size];
            crate::fft::fftar(&buf, &mut packed);

            let n_bins = block_size / 2 + 1;
            let mut re = vec![0.0f64; n_bins];
            let mut im = vec![0.0f64; n_bins];
            re[0] = packed[0] as f64;
            re[block_size / 2] = packed[1] as f64;
            for k in 1..block_size / 2 {
                re[k] = packed[2 * k] as f64;
                im[k] = packed[2 * k + 1] as f64;
            }
            frame_re.push(re);
            frame_im.push(im);
            frame_signals.push(windowed);
        }

        // 3. Peak detection (global max-magnitude normalization across all frames).
        let max_mag = frame_re
            .iter()
            .zip(frame_im.iter())
            .flat_map(|(re, im)| re.iter().zip(im.iter()))
            .map(|(r, i)| (r * r + i * i).sqrt())
            .fold(0.0, f64::max);

        let search_params = peaks::PeakSearchParams {
            mix_freq: self.params.mix_freq,
            frame_size,
            block_size,
            zeropad: 1, // block_size already includes zeropad above
            peak_width_threshold: self.params.peak_width,
            window: self.params.window,
            window_weight,
        };

        let frame_peaks: Vec<Vec<peaks::Peak>> = frame_re
            .iter()
            .zip(frame_im.iter())
            .map(|(re, im)| peaks::search_local_maxima(re, im, max_mag.max(1e-30), &search_params))
            .collect();

        // 4. Partial linking.
        let forward_links = peaks::link_partials(&frame_peaks);

        // 5. Validation.
        let keep = peaks::validate_partials(&frame_peaks, &forward_links);

        let mut enc_blocks: Vec<EncoderBlock> = (0..n_frames)
            .map(|f| {
                let mut block = EncoderBlock::default();
                for (p, peak) in frame_peaks[f].iter().enumerate() {
                    if keep[f][p] {
                        block.freqs.push(peak.freq);
                        block.mags.push(peak.mag);
                        block.phases.push(peak.phase);
                    }
                }
                block
            })
            .collect();

        // 6. Refinement (opt_level >= 1).
        if opt_level != OptLevel::None {
            for f in 0..n_frames {
                let mut refinable = refine::RefinablePartials {
                    freqs: enc_blocks[f].freqs.clone(),
                    mags: enc_blocks[f].mags.clone(),
                    phases: enc_blocks[f].phases.clone(),
                };
                refine::refine_sine_params_fast(
                    &frame_signals[f],
                    self.params.window,
                    self.params.mix_freq,
                    &mut refinable,
                );
                enc_blocks[f].mags = refinable.mags;
                enc_blocks[f].phases = refinable.phases;
            }
        }

        // 7. Spectral subtraction.
        for f in 0..n_frames {
            let refinable = refine::RefinablePartials {
                freqs: enc_blocks[f].freqs.clone(),
                mags: enc_blocks[f].mags.clone(),
                phases: enc_blocks[f].phases.clone(),
            };
            refine::spectral_subtract(
                frame_size,
                block_size,
                self.params.window,
                self.params.mix_freq,
                &refinable,
                &mut frame_re[f],
                &mut frame_im[f],
            );
        }

        // 8. Noise envelope.
        for f in 0..n_frames {
            let envelope = noise::approx_noise(
                &mut frame_re[f],
                &mut frame_im[f],
                window_weight_sq,
                self.params.mix_freq,
            );
            enc_blocks[f].noise = envelope;
        }

        // 9. Attack optimization.
        if do_attack {
            let n_attack_frames = n_frames.min(20);
            let attack_frames: Vec<attack::AttackFrame> = (0..n_attack_frames)
                .map(|f| {
                    let mut unscaled = vec![0.0f64; frame_size];
                    for p in 0..enc_blocks[f].freqs.len() {
                        let omega = std::f64::consts::TAU * enc_blocks[f].freqs[p] / self.params.mix_freq;
                        let mag = enc_blocks[f].mags[p] * 0.5; // SA scale factor
                        let phase = enc_blocks[f].phases[p];
                        for (t, s) in unscaled.iter_mut().enumerate() {
                            *s += mag * (omega * t as f64 + phase).sin();
                        }
                    }
                    let frame_start = f as i64 * frame_step as i64 - self.zero_values_at_start as i64;
                    let samples_in_frame = ((samples.len() as i64 - frame_start).clamp(0, frame_size as i64)).max(0);
                    attack::AttackFrame {
                        unscaled_signal: unscaled,
                        frame_start_sample: frame_start,
                        samples_in_frame,
                    }
                })
                .collect();

            let (winner, scales) = attack::compute_attack_params(&attack_frames, samples, self.params.mix_freq);
            self.attack_start_ms = winner.attack_start_ms;
            self.attack_end_ms = winner.attack_end_ms;
            for (f, scale) in scales.iter().enumerate() {
                for m in enc_blocks[f].mags.iter_mut() {
                    *m *= scale;
                }
            }
        }

        // 10 + 11. Sort, drop zero-mag, quantize.
        self.audio_blocks = enc_blocks
            .iter_mut()
            .map(|eb| {
                sort_and_drop_zero(eb);
                eb.quantize(self.params.fundamental_freq, self.params.mix_freq, frame_size, self.params.enable_phases)
            })
            .collect();

        Ok(())
    }

    pub fn save_as_audio(&self) -> Result<Audio> {
        let audio = Audio {
            fundamental_freq: self.params.fundamental_freq,
            mix_freq: self.params.mix_freq,
            frame_size_ms: self.params.effective_frame_size_ms(),
            frame_step_ms: self.params.frame_step_ms,
            zeropad: self.params.zeropad,
            zero_values_at_start: self.zero_values_at_start,
            sample_count: self.sample_count,
            attack_start_ms: self.attack_start_ms,
            attack_end_ms: self.attack_end_ms,
            loop_type: self.loop_type,
            loop_start: self.loop_start,
            loop_end: self.loop_end,
            original_samples: Vec::new(),
            original_samples_norm_db: 0.0,
            contents: self.audio_blocks.clone(),
        };
        audio.validate()?;
        Ok(audio)
    }
}

fn sort_and_drop_zero(block: &mut EncoderBlock) {
    let mut idx: Vec<usize> = (0..block.freqs.len()).filter(|&i| block.mags[i] > 0.0).collect();
    idx.sort_by(|&a, &b| block.freqs[a].partial_cmp(&block.freqs[b]).unwrap());
    let freqs: Vec<f64> = idx.iter().map(|&i| block.freqs[i]).collect();
    let mags: Vec<f64> = idx.iter().map(|&i| block.mags[i]).collect();
    let phases: Vec<f64> = idx.iter().map(|&i| block.phases[i]).collect();
    block.freqs = freqs;
    block.mags = mags;
    block.phases = phases;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_samples(freq: f64, mix_freq: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (std::f64::consts::TAU * freq * i as f64 / mix_freq).sin() as f32)
            .collect()
    }

    #[test]
    fn encodes_pure_sine_with_partial_near_fundamental() {
        let mix_freq = 48000.0;
        let freq = 440.0;
        let params = EncoderParams {
            mix_freq,
            fundamental_freq: freq,
            frame_size_ms: 40.0,
            frame_step_ms: 10.0,
            zeropad: 4,
            ..Default::default()
        };
        let mut encoder = Encoder::new(params).unwrap();
        let samples = sine_samples(freq, mix_freq, (mix_freq * 0.3) as usize);
        encoder.encode(&samples, OptLevel::Refine, false).unwrap();
        let audio = encoder.save_as_audio().unwrap();
        let mid_frame = &audio.contents[audio.contents.len() / 2];
        assert!(mid_frame.n_partials() > 0, "expected at least one partial");
        let closest = (0..mid_frame.n_partials())
            .min_by(|&a, &b| {
                (mid_frame.freq_f(a) - freq).abs().partial_cmp(&(mid_frame.freq_f(b) - freq).abs()).unwrap()
            })
            .unwrap();
        let cents = 1200.0 * (mid_frame.freq_f(closest) / freq).log2();
        assert!(cents.abs() < 50.0, "cents={cents}");
    }

    #[test]
    fn silent_input_yields_no_partials() {
        let params = EncoderParams::default();
        let mut encoder = Encoder::new(params).unwrap();
        let samples = vec![0.0f32; 48000 / 4];
        encoder.encode(&samples, OptLevel::Refine, false).unwrap();
        let audio = encoder.save_as_audio().unwrap();
        assert!(audio.contents.iter().all(|b| b.n_partials() == 0));
    }

    #[test]
    fn rejects_bad_params() {
        let mut params = EncoderParams::default();
        params.fundamental_freq = -1.0;
        assert!(Encoder::new(params).is_err());
    }
}
