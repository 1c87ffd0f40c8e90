//! The real-time synthesis voice: IFFT-based additive sines plus random-phase noise,
//! with pitch control, portamento, vibrato, unison, anti-aliasing, looping, formant
//! correction, and an original-samples passthrough mode. Never allocates, locks, or
//! logs on the per-sample path once `precompute_tables` has warmed the process-wide
//! caches.

use crate::block::{Audio, AudioBlock, LoopType};
use crate::formant::{FormantCorrection, FormantMode};
use crate::ifft_synth::{self, RenderMode};
use crate::noise_band::{NoiseDecoder, SmoothingWindow};
use crate::polyphase;
use crate::random::Random;

const DELTA: usize = 7; // PolyPhaseInter::min_padding()
const ANTI_ALIAS_STEPS: usize = 256;
const ANTI_ALIAS_DB_AT_NYQUIST: f64 = -60.0;
const REFERENCE_FILTER_FACT: f64 = 18000.0 / 44100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Active,
    AlmostDone,
    Done,
}

fn anti_alias_table() -> &'static [f64; ANTI_ALIAS_STEPS] {
    use once_cell::sync::Lazy;
    static TABLE: Lazy<[f64; ANTI_ALIAS_STEPS]> = Lazy::new(|| {
        let mut t = [0.0; ANTI_ALIAS_STEPS];
        for (i, v) in t.iter_mut().enumerate() {
            let db = ANTI_ALIAS_DB_AT_NYQUIST * i as f64 / ANTI_ALIAS_STEPS as f64;
            *v = crate::math::db_to_factor(db);
        }
        t
    });
    &TABLE
}

/// `f2` lies within 5% of `f1`, asymmetric around the reference frequency `f1`.
fn fmatch(f1: f64, f2: f64) -> bool {
    f2 < f1 * 1.05 && f2 > f1 * 0.95
}

/// Remaps `frame_idx` for looped playback. Passes through unchanged at or below
/// `loop_start`; the asymmetry between FORWARD's `+1` period and PING_PONG's lack of one
/// is intentional.
fn compute_loop_frame_index(frame_idx: usize, audio: &Audio) -> usize {
    if frame_idx <= audio.loop_start {
        return frame_idx;
    }
    match audio.loop_type {
        LoopType::FrameForward => {
            let period = audio.loop_end + 1 - audio.loop_start;
            if period == 0 {
                audio.loop_start
            } else {
                audio.loop_start + (frame_idx - audio.loop_start) % period
            }
        }
        LoopType::FramePingPong => {
            if audio.loop_end == audio.loop_start {
                return audio.loop_start;
            }
            let period = 2 * (audio.loop_end - audio.loop_start);
            let phase = (frame_idx - audio.loop_start) % period;
            if phase <= audio.loop_end - audio.loop_start {
                audio.loop_start + phase
            } else {
                audio.loop_end - (phase - (audio.loop_end - audio.loop_start))
            }
        }
        _ => frame_idx,
    }
}

struct PortamentoState {
    buffer: Vec<f32>,
    active: bool,
}

impl PortamentoState {
    fn new() -> PortamentoState {
        PortamentoState {
            buffer: Vec::new(),
            active: false,
        }
    }

    fn check(&mut self, freq_in: &[f64], current_freq: f64) {
        if self.active {
            return;
        }
        if freq_in.iter().any(|&f| (f / current_freq - 1.0).abs() > 0.0001) {
            self.active = true;
        }
    }

    fn grow(&mut self, new_samples: &[f32]) {
        self.buffer.extend_from_slice(new_samples);
    }

    fn shrink(&mut self) {
        if self.buffer.len() > 256 {
            let keep = 2 * DELTA;
            let start = self.buffer.len() - keep;
            self.buffer.drain(0..start);
        }
    }
}

#[derive(Clone, Debug)]
struct Vibrato {
    depth_cents: f64,
    frequency: f64,
    attack_ms: f64,
    phase: f64,
    env: f64,
    enabled: bool,
}

impl Vibrato {
    fn new() -> Vibrato {
        Vibrato {
            depth_cents: 0.0,
            frequency: 4.0,
            attack_ms: 0.0,
            phase: 0.0,
            env: 0.0,
            enabled: false,
        }
    }

    /// Applies vibrato to `freq_in` in place (one block's worth of per-sample
    /// frequencies), advancing internal phase/envelope state.
    fn process(&mut self, freq_in: &mut [f64], mix_freq: f64) {
        if !self.enabled || self.depth_cents <= 0.0 {
            return;
        }
        let attack_samples = self.attack_ms / 1000.0 * mix_freq;
        let env_inc = if attack_samples > 1.0 { 1.0 / attack_samples } else { 1.0 };
        let depth_factor = 2f64.powf(self.depth_cents / 1200.0) - 1.0;
        let omega = std::f64::consts::TAU * self.frequency / mix_freq;

        for f in freq_in.iter_mut() {
            let env_clamped = self.env.min(1.0);
            *f *= 1.0 + self.phase.sin() * depth_factor * env_clamped;
            self.env += env_inc;
            self.phase += omega;
        }
        self.phase = self.phase.rem_euclid(std::f64::consts::TAU);
    }
}

struct UnisonVoice {
    freq_factor: f64,
    phase: f64,
}

fn build_unison(voices: usize, detune_cents: f64, rng: &mut Random) -> Vec<UnisonVoice> {
    let mut out = Vec::with_capacity(voices);
    if voices <= 1 {
        out.push(UnisonVoice { freq_factor: 1.0, phase: 0.0 });
        return out;
    }
    for i in 0..voices {
        let cents = -detune_cents / 2.0 + i as f64 / (voices as f64 - 1.0) * detune_cents;
        out.push(UnisonVoice {
            freq_factor: 2f64.powf(cents / 1200.0),
            phase: rng.random_double_range(0.0, std::f64::consts::TAU),
        });
    }
    out
}

/// A per-frame frequency-domain hook invoked once per rendered sines+noise block, given
/// mutable access to the packed `re`/`im` spectrum before the inverse FFT.
pub type FilterCallback = Box<dyn FnMut(&mut [f64], &mut [f64]) + Send>;

pub struct LiveDecoder {
    mix_freq: f64,
    state: DecoderState,
    audio: Option<Audio>,
    current_freq: f64,
    fundamental_note_freq: f64,
    frame_step_samples: f64,
    env_pos: f64,
    frame_idx: usize,
    partial_phase: Vec<f64>,
    partial_freq_prev: Vec<f64>,
    block_size: usize,
    out_buf: Vec<f32>,
    out_pos: usize,
    noise_rng: Random,
    noise_seed: Option<u64>,
    unison_voices: Vec<UnisonVoice>,
    vibrato: Vibrato,
    portamento: PortamentoState,
    formant: FormantCorrection,
    use_original_samples: bool,
    orig_read_pos: f64,
    noise_enabled: bool,
    sines_enabled: bool,
    loop_enabled: bool,
    start_skip_enabled: bool,
    filter_callback: Option<FilterCallback>,
    process_offset_ms: f64,
    time_offset_ms_value: f64,
}

impl LiveDecoder {
    pub fn new(mix_freq: f64) -> LiveDecoder {
        LiveDecoder {
            mix_freq,
            state: DecoderState::Idle,
            audio: None,
            current_freq: 440.0,
            fundamental_note_freq: 440.0,
            frame_step_samples: 0.0,
            env_pos: 0.0,
            frame_idx: 0,
            partial_phase: Vec::new(),
            partial_freq_prev: Vec::new(),
            block_size: 1024,
            out_buf: vec![0.0; 1024],
            out_pos: 0,
            noise_rng: Random::new(),
            noise_seed: None,
            unison_voices: vec![UnisonVoice { freq_factor: 1.0, phase: 0.0 }],
            vibrato: Vibrato::new(),
            portamento: PortamentoState::new(),
            formant: FormantCorrection::new(FormantMode::Repitch),
            use_original_samples: false,
            orig_read_pos: 0.0,
            noise_enabled: true,
            sines_enabled: true,
            loop_enabled: true,
            start_skip_enabled: true,
            filter_callback: None,
            process_offset_ms: 0.0,
            time_offset_ms_value: 0.0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn done(&self) -> bool {
        self.state == DecoderState::Done
    }

    pub fn set_noise_seed(&mut self, seed: Option<u64>) {
        self.noise_seed = seed;
    }

    pub fn set_unison_voices(&mut self, voices: usize, detune_cents: f64) {
        let changed = voices != self.unison_voices.len();
        if changed {
            self.unison_voices = build_unison(voices, detune_cents, &mut self.noise_rng);
        } else {
            for (i, v) in self.unison_voices.iter_mut().enumerate() {
                let cents = if voices > 1 {
                    -detune_cents / 2.0 + i as f64 / (voices as f64 - 1.0) * detune_cents
                } else {
                    0.0
                };
                v.freq_factor = 2f64.powf(cents / 1200.0);
            }
        }
    }

    pub fn set_vibrato(&mut self, enabled: bool, depth_cents: f64, frequency: f64, attack_ms: f64) {
        self.vibrato.enabled = enabled;
        self.vibrato.depth_cents = depth_cents;
        self.vibrato.frequency = frequency;
        self.vibrato.attack_ms = attack_ms;
    }

    pub fn set_formant_mode(&mut self, mode: FormantMode) {
        self.formant.set_mode(mode);
    }

    pub fn set_fuzzy_resynth(&mut self, percent: f64) {
        self.formant.set_fuzzy_resynth(percent);
    }

    pub fn enable_original_samples(&mut self, enabled: bool) {
        self.use_original_samples = enabled;
    }

    pub fn enable_noise(&mut self, enabled: bool) {
        self.noise_enabled = enabled;
    }

    pub fn enable_sines(&mut self, enabled: bool) {
        self.sines_enabled = enabled;
    }

    pub fn enable_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn enable_start_skip(&mut self, enabled: bool) {
        self.start_skip_enabled = enabled;
    }

    /// Installs a hook called once per rendered source frame (not per sample), with
    /// mutable access to that frame's packed frequency-domain spectrum before the
    /// inverse FFT. `time_offset_ms()` reflects the frame's position within the
    /// enclosing `process()` call while the hook runs.
    pub fn set_filter_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut [f64], &mut [f64]) + Send + 'static,
    {
        self.filter_callback = Some(Box::new(callback));
    }

    /// Offset, in milliseconds, of the most recently rendered frame within the current
    /// (or most recent) `process()` call. Only meaningful when read from inside a
    /// `set_filter_callback` hook; reads as `0.0` otherwise.
    pub fn time_offset_ms(&self) -> f64 {
        self.time_offset_ms_value
    }

    /// Bind a new `Audio` model and reset all per-voice state for a fresh note.
    pub fn retrigger(&mut self, audio: Audio, note_freq: f64, velocity: i32) {
        let _ = velocity;
        self.block_size = preferred_block_size(self.mix_freq);
        self.out_buf = vec![0.0; self.block_size];
        self.out_pos = self.block_size / 2;
        self.current_freq = note_freq;
        self.fundamental_note_freq = audio.fundamental_freq;
        self.frame_step_samples = audio.frame_step_ms * 0.001 * self.mix_freq;
        self.env_pos = 0.0;
        self.frame_idx = 0;
        self.orig_read_pos = 0.0;
        self.partial_phase.clear();
        self.partial_freq_prev.clear();
        self.portamento = PortamentoState::new();
        self.vibrato.phase = 0.0;
        self.vibrato.env = 0.0;
        if let Some(seed) = self.noise_seed {
            self.noise_rng.set_seed(seed);
        }
        self.formant.retrigger(&mut self.noise_rng);
        self.audio = Some(audio);
        self.state = DecoderState::Active;
    }

    /// Renders one frame's worth of sines + noise into a fresh windowed time-domain
    /// block, and folds it into `out_buf` via 50% overlap-add.
    fn render_next_frame(&mut self) {
        let block_size = self.block_size;
        let n_bins = block_size / 2 + 1;

        // Shift the persisted tail forward, making room for the new frame's energy.
        let half = block_size / 2;
        self.out_buf.copy_within(half..block_size, 0);
        for v in self.out_buf[half..].iter_mut() {
            *v = 0.0;
        }

        let Some(audio) = self.audio.as_ref() else { return };
        let frame_idx = if self.loop_enabled {
            compute_loop_frame_index(self.frame_idx, audio)
        } else {
            self.frame_idx
        };
        if frame_idx >= audio.contents.len() {
            self.state = DecoderState::AlmostDone;
            self.frame_idx += 1;
            return;
        }
        let block: &AudioBlock = &audio.contents[frame_idx];

        let mut re = vec![0.0f64; n_bins];
        let mut im = vec![0.0f64; n_bins];

        if self.sines_enabled {
            let norm_nyquist = 0.5;
            let table = anti_alias_table();
            let max_freq_hz = self.mix_freq * norm_nyquist;
            let ratio = self.current_freq / self.fundamental_note_freq;

            let partials: Vec<(f64, f64)> = match self.formant.mode() {
                FormantMode::HarmonicResynthesis => {
                    self.formant.resynth_harmonics(block, block.n_partials(), ratio, max_freq_hz)
                }
                _ => {
                    let orig_mags: Vec<f64> = (0..block.n_partials()).map(|i| block.mag_f(i)).collect();
                    let resynth_hz: Vec<f64> =
                        (0..block.n_partials()).map(|i| block.freq_f(i) * self.current_freq).collect();
                    let formant_scales = self.formant.magnitude_scales(block, ratio, &resynth_hz, max_freq_hz);
                    resynth_hz
                        .into_iter()
                        .zip(orig_mags.iter().zip(formant_scales.iter()).map(|(m, s)| m * s))
                        .collect()
                }
            };

            // Carry phase continuity forward from the previous frame's partials via
            // nearest-frequency matching (`fmatch`), else start a fresh partial at
            // phase 0.
            let mut new_phase = vec![0.0f64; partials.len()];
            for (i, &(freq_hz, _)) in partials.iter().enumerate() {
                let mut carried = None;
                for (j, &prev_freq) in self.partial_freq_prev.iter().enumerate() {
                    if fmatch(prev_freq, freq_hz) {
                        carried = Some(self.partial_phase[j]);
                        break;
                    }
                }
                new_phase[i] = carried.unwrap_or(0.0);
            }

            for (voice_idx, voice) in self.unison_voices.iter_mut().enumerate() {
                let unison_gain = 1.0 / (self.unison_voices.len() as f64).sqrt();
                for (i, &(freq_hz, mag0)) in partials.iter().enumerate() {
                    let stretched = freq_hz * voice.freq_factor;
                    let norm_freq = stretched / self.mix_freq;
                    if norm_freq > norm_nyquist {
                        break; // frequency-sorted partials: everything after is higher still
                    }
                    let mut mag = mag0 * unison_gain;
                    if norm_freq > REFERENCE_FILTER_FACT {
                        let idx = (256.0 * (norm_freq - REFERENCE_FILTER_FACT) / (0.5 - REFERENCE_FILTER_FACT))
                            .round() as isize;
                        if idx >= 256 {
                            mag = 0.0;
                        } else if idx >= 0 {
                            mag *= table[idx as usize];
                        }
                    }
                    if mag <= 0.0 {
                        continue;
                    }
                    let freq_in_bins = stretched * block_size as f64 / self.mix_freq;
                    let phase = new_phase[i] + voice.phase;
                    let mode = if voice_idx == 0 && i == 0 { RenderMode::Replace } else { RenderMode::Add };
                    ifft_synth::render_partial(&mut re, &mut im, block_size, freq_in_bins, mag, phase, mode);
                }
                voice.phase = voice.phase.rem_euclid(std::f64::consts::TAU);
            }

            self.partial_phase = new_phase;
            self.partial_freq_prev = partials.into_iter().map(|(f, _)| f).collect();
        } else {
            self.partial_phase.clear();
            self.partial_freq_prev.clear();
        }

        if self.noise_enabled {
            let noise_decoder = NoiseDecoder::new(block_size, self.mix_freq, SmoothingWindow::BlackmanHarris92);
            let mut noise_re = vec![0.0; n_bins];
            let mut noise_im = vec![0.0; n_bins];
            noise_decoder.process(
                &mut self.noise_rng,
                &block.noise.map(crate::math::sm_idb2factor),
                &mut noise_re,
                &mut noise_im,
                None,
            );
            for k in 0..n_bins {
                re[k] += noise_re[k];
                im[k] += noise_im[k];
            }
        }

        self.time_offset_ms_value = self.process_offset_ms;
        if let Some(cb) = self.filter_callback.as_mut() {
            cb(&mut re, &mut im);
        }

        let mut packed_input = vec![0.0f32; block_size];
        packed_input[0] = re[0] as f32;
        packed_input[1] = re[n_bins - 1] as f32;
        for k in 1..n_bins - 1 {
            packed_input[2 * k] = re[k] as f32;
            packed_input[2 * k + 1] = im[k] as f32;
        }
        let mut packed = vec![0.0f32; block_size];
        crate::fft::fftsr_destructive(&mut packed_input, &mut packed);
        ifft_synth::apply_win_scale(block_size, &mut packed);

        // Half-swap the raw inverse-FFT output into the persisted overlap-add buffer:
        // the window table was built odd-centered (see ifft_synth.rs), so the IFFT's
        // natural output is itself half-rotated relative to the buffer's sample order.
        let half_out = block_size / 2;
        for i in 0..block_size {
            let src = (i + half_out) % block_size;
            self.out_buf[i] += packed[src];
        }

        self.frame_idx += 1;
        self.env_pos += self.frame_step_samples;
        self.formant.advance(audio.frame_step_ms, &mut self.noise_rng);
    }

    /// Produces `n_values` samples into `out`, applying the attack envelope and
    /// portamento, advancing pitch per `freq_in` (length `n_values`, Hz).
    pub fn process(&mut self, freq_in: &[f64], out: &mut [f32]) {
        assert_eq!(freq_in.len(), out.len());
        if self.audio.is_none() {
            out.fill(0.0);
            self.state = DecoderState::Done;
            return;
        }

        let max_sub = (self.mix_freq * 0.010).round().max(1.0) as usize;
        let mut produced = 0;
        while produced < out.len() {
            let chunk = max_sub.min(out.len() - produced);
            self.process_offset_ms = produced as f64 * 1000.0 / self.mix_freq;
            let mut freq_chunk = freq_in[produced..produced + chunk].to_vec();
            self.vibrato.process(&mut freq_chunk, self.mix_freq);
            self.process_sub_block(&freq_chunk, &mut out[produced..produced + chunk]);
            produced += chunk;
        }

        if self.state == DecoderState::AlmostDone && out.iter().all(|&v| v == 0.0) {
            self.state = DecoderState::Done;
        }
    }

    fn process_sub_block(&mut self, freq_in: &[f64], out: &mut [f32]) {
        self.current_freq = freq_in.last().copied().unwrap_or(self.current_freq);

        if self.use_original_samples {
            self.process_original_samples(freq_in, out);
            return;
        }

        let audio = self.audio.as_ref().unwrap();
        let attack_start = audio.attack_start_ms;
        let attack_end = audio.attack_end_ms;
        let zero_at_start = audio.zero_values_at_start as f64;
        self.portamento.check(freq_in, self.current_freq);

        for sample in out.iter_mut() {
            if self.out_pos >= self.block_size / 2 {
                self.render_next_frame();
                self.out_pos = 0;
            }
            let raw = self.out_buf[self.out_pos];
            self.out_pos += 1;

            let time_ms = self.env_pos * 1000.0 / self.mix_freq;
            let env = if self.start_skip_enabled && self.env_pos < zero_at_start {
                0.0
            } else if time_ms < attack_start {
                0.0
            } else if time_ms < attack_end {
                (time_ms - attack_start) / (attack_end - attack_start).max(1e-9)
            } else {
                1.0
            };
            *sample = raw * env as f32;
        }

        if self.portamento.active {
            self.portamento.grow(out);
            self.portamento.shrink();
        }
    }

    /// Bypasses sines+noise synthesis entirely and plays `audio.original_samples`
    /// back through the fractional-sample interpolator, tracking `freq_in` as a
    /// playback-rate ratio rather than a resynthesis target.
    fn process_original_samples(&mut self, freq_in: &[f64], out: &mut [f32]) {
        let audio = self.audio.as_ref().unwrap();
        let sample_count = audio.original_samples.len();
        let zero_at_start = audio.zero_values_at_start as f64;
        let attack_start = audio.attack_start_ms;
        let attack_end = audio.attack_end_ms;
        let time_loop = self.loop_enabled && audio.loop_type == LoopType::TimeForward;
        let loop_end = audio.loop_end as f64;
        let loop_start = audio.loop_start as f64;

        for (i, sample) in out.iter_mut().enumerate() {
            let phase_inc = (freq_in[i] / audio.fundamental_freq) * (audio.mix_freq / self.mix_freq);

            if time_loop {
                while self.orig_read_pos >= loop_end - zero_at_start {
                    self.orig_read_pos -= loop_end - loop_start;
                }
            }

            let raw = if (phase_inc - 1.0).abs() < 1e-6 {
                let ipos = self.orig_read_pos.round();
                if ipos >= 0.0 && (ipos as usize) < sample_count {
                    audio.original_samples[ipos as usize] as f64
                } else {
                    0.0
                }
            } else {
                polyphase::get_sample(&audio.original_samples, self.orig_read_pos)
            };

            let time_ms = self.env_pos * 1000.0 / self.mix_freq;
            let env = if self.start_skip_enabled && self.env_pos < zero_at_start {
                0.0
            } else if time_ms < attack_start {
                0.0
            } else if time_ms < attack_end {
                (time_ms - attack_start) / (attack_end - attack_start).max(1e-9)
            } else {
                1.0
            };
            *sample = (raw * env) as f32;

            self.orig_read_pos += phase_inc;
            self.env_pos += 1.0;

            if !time_loop && self.orig_read_pos >= sample_count as f64 {
                self.state = DecoderState::AlmostDone;
            }
        }
    }

    pub fn precompute_tables(&mut self) {
        crate::fft::precompute_plans(self.block_size);
        ifft_synth::precompute_tables(self.block_size);
        let _ = polyphase::min_padding();
        let mut scratch = [0.0f32; 1];
        self.process(&[440.0], &mut scratch);
        self.audio = None;
        self.state = DecoderState::Idle;
    }
}

/// Smallest power of two `bs` such that `2*bs/mix_freq >= 0.040` (>= 40ms per block).
pub fn preferred_block_size(mix_freq: f64) -> usize {
    let mut bs = 1usize;
    while (2 * bs) as f64 / mix_freq < 0.040 {
        bs *= 2;
    }
    bs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{AudioBlock, LoopType};
    use crate::math::{sm_factor2idb, sm_freq2ifreq};

    fn sine_audio(freq: f64, mix_freq: f64, n_frames: usize) -> Audio {
        let mut audio = Audio {
            fundamental_freq: freq,
            mix_freq,
            frame_size_ms: 40.0,
            frame_step_ms: 10.0,
            zeropad: 4,
            zero_values_at_start: 0,
            sample_count: 48000,
            attack_start_ms: 0.0,
            attack_end_ms: 1.0,
            loop_type: LoopType::None,
            loop_start: 0,
            loop_end: 0,
            original_samples: Vec::new(),
            original_samples_norm_db: 0.0,
            contents: Vec::new(),
        };
        for _ in 0..n_frames {
            let mut block = AudioBlock::default();
            block.freqs.push(sm_freq2ifreq(1.0));
            block.mags.push(sm_factor2idb(0.5));
            audio.contents.push(block);
        }
        audio
    }

    #[test]
    fn silence_without_bound_audio_marks_done_immediately() {
        let mut decoder = LiveDecoder::new(48000.0);
        let mut out = vec![1.0f32; 16];
        decoder.process(&[440.0; 16], &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(decoder.state(), DecoderState::Done);
    }

    #[test]
    fn retrigger_produces_nonzero_signal_after_attack() {
        let mix_freq = 48000.0;
        let freq = 440.0;
        let audio = sine_audio(freq, mix_freq, 50);
        let mut decoder = LiveDecoder::new(mix_freq);
        decoder.retrigger(audio, freq, 100);
        let n = 4096;
        let mut out = vec![0.0f32; n];
        let freq_in = vec![freq; n];
        decoder.process(&freq_in, &mut out);
        let energy: f64 = out.iter().map(|&v| (v as f64) * (v as f64)).sum();
        assert!(energy > 0.0);
    }

    #[test]
    fn loop_forward_period_matches_spec() {
        let audio = sine_audio(440.0, 48000.0, 10);
        let mut audio = audio;
        audio.loop_type = LoopType::FrameForward;
        audio.loop_start = 2;
        audio.loop_end = 4;
        assert_eq!(compute_loop_frame_index(2, &audio), 2);
        assert_eq!(compute_loop_frame_index(5, &audio), 2);
        assert_eq!(compute_loop_frame_index(6, &audio), 3);
    }

    #[test]
    fn loop_ping_pong_degenerate_case() {
        let mut audio = sine_audio(440.0, 48000.0, 10);
        audio.loop_type = LoopType::FramePingPong;
        audio.loop_start = 3;
        audio.loop_end = 3;
        assert_eq!(compute_loop_frame_index(5, &audio), 3);
    }

    #[test]
    fn unison_gain_compensates_voice_count() {
        let mut decoder = LiveDecoder::new(48000.0);
        decoder.set_unison_voices(4, 20.0);
        assert_eq!(decoder.unison_voices.len(), 4);
    }

    #[test]
    fn portamento_activates_on_large_freq_change() {
        let mut state = PortamentoState::new();
        state.check(&[440.0, 460.0], 440.0);
        assert!(state.active);
    }

    #[test]
    fn portamento_stays_inactive_for_tiny_drift() {
        let mut state = PortamentoState::new();
        state.check(&[440.0, 440.001], 440.0);
        assert!(!state.active);
    }

    #[test]
    fn enable_sines_false_silences_partial_rendering() {
        let mix_freq = 48000.0;
        let audio = sine_audio(440.0, mix_freq, 50);
        let mut decoder = LiveDecoder::new(mix_freq);
        decoder.enable_sines(false);
        decoder.enable_noise(false);
        decoder.retrigger(audio, 440.0, 100);
        let n = 4096;
        let mut out = vec![1.0f32; n];
        let freq_in = vec![440.0; n];
        decoder.process(&freq_in, &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn original_samples_mode_plays_back_stored_waveform() {
        let mix_freq = 48000.0;
        let mut audio = sine_audio(440.0, mix_freq, 1);
        audio.attack_start_ms = 0.0;
        audio.attack_end_ms = 0.0;
        audio.original_samples = (0..8192)
            .map(|i| (std::f64::consts::TAU * 440.0 * i as f64 / mix_freq).sin() as f32)
            .collect();

        let mut decoder = LiveDecoder::new(mix_freq);
        decoder.enable_original_samples(true);
        decoder.retrigger(audio, 440.0, 100);

        let n = 4096;
        let mut out = vec![0.0f32; n];
        let freq_in = vec![440.0; n];
        decoder.process(&freq_in, &mut out);

        let energy: f64 = out.iter().map(|&v| (v as f64) * (v as f64)).sum();
        assert!(energy > 0.0);
    }

    #[test]
    fn filter_callback_is_invoked_during_processing() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let mix_freq = 48000.0;
        let audio = sine_audio(440.0, mix_freq, 50);
        let mut decoder = LiveDecoder::new(mix_freq);
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        decoder.set_filter_callback(move |_re, _im| {
            called_clone.store(true, Ordering::SeqCst);
        });
        decoder.retrigger(audio, 440.0, 100);
        let n = 4096;
        let mut out = vec![0.0f32; n];
        let freq_in = vec![440.0; n];
        decoder.process(&freq_in, &mut out);
        assert!(called.load(Ordering::SeqCst));
    }
}
