//! The persisted-in-memory data model: one sample's spectral model (`Audio`), made up
//! of quantized per-frame `AudioBlock`s, plus the encoder's transient float-valued
//! equivalents (`EncoderBlock`, `Tracksel`).

use crate::math::{sm_factor2idb, sm_freq2ifreq, sm_idb2factor, sm_ifreq2freq};
use crate::{Error, Result};

pub const NOISE_BANDS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopType {
    None,
    FrameForward,
    FramePingPong,
    TimeForward,
    TimePingPong,
}

/// One analysis frame as persisted: quantized partials plus the mel-band noise
/// envelope. `freqs`/`mags` are parallel and sorted non-decreasing by frequency.
#[derive(Clone, Debug, Default)]
pub struct AudioBlock {
    pub freqs: Vec<u16>,
    pub mags: Vec<u16>,
    pub phases: Vec<u16>,
    pub noise: [u16; NOISE_BANDS],
    /// Optional spectral envelope used by formant modes; empty when absent.
    pub env: Vec<f64>,
    pub env_f0: f64,
}

impl AudioBlock {
    pub fn validate(&self) -> Result<()> {
        if self.mags.len() != self.freqs.len() {
            return Err(Error::invalid_model("freqs/mags length mismatch"));
        }
        if !self.phases.is_empty() && self.phases.len() != self.freqs.len() {
            return Err(Error::invalid_model("phases length mismatch"));
        }
        if !self.freqs.windows(2).all(|w| w[0] <= w[1]) {
            return Err(Error::invalid_model("freqs not sorted non-decreasing"));
        }
        Ok(())
    }

    pub fn freq_f(&self, i: usize) -> f64 {
        sm_ifreq2freq(self.freqs[i])
    }

    pub fn mag_f(&self, i: usize) -> f64 {
        sm_idb2factor(self.mags[i])
    }

    pub fn phase_f(&self, i: usize) -> f64 {
        if self.phases.is_empty() {
            0.0
        } else {
            self.phases[i] as f64 / 65536.0 * std::f64::consts::TAU
        }
    }

    pub fn n_partials(&self) -> usize {
        self.freqs.len()
    }
}

/// One sample model: globals plus an ordered sequence of frames.
#[derive(Clone, Debug)]
pub struct Audio {
    pub fundamental_freq: f64,
    pub mix_freq: f64,
    pub frame_size_ms: f64,
    pub frame_step_ms: f64,
    pub zeropad: usize,
    pub zero_values_at_start: usize,
    pub sample_count: usize,
    pub attack_start_ms: f64,
    pub attack_end_ms: f64,
    pub loop_type: LoopType,
    pub loop_start: usize,
    pub loop_end: usize,
    pub original_samples: Vec<f32>,
    pub original_samples_norm_db: f64,
    pub contents: Vec<AudioBlock>,
}

impl Default for Audio {
    fn default() -> Self {
        Audio {
            fundamental_freq: 440.0,
            mix_freq: 48000.0,
            frame_size_ms: 40.0,
            frame_step_ms: 10.0,
            zeropad: 4,
            zero_values_at_start: 0,
            sample_count: 0,
            attack_start_ms: 0.0,
            attack_end_ms: 0.0,
            loop_type: LoopType::None,
            loop_start: 0,
            loop_end: 0,
            original_samples: Vec::new(),
            original_samples_norm_db: 0.0,
            contents: Vec::new(),
        }
    }
}

impl Audio {
    pub fn validate(&self) -> Result<()> {
        if self.frame_step_ms > self.frame_size_ms {
            return Err(Error::invalid_model("frame_step_ms must be <= frame_size_ms"));
        }
        match self.loop_type {
            LoopType::FrameForward | LoopType::FramePingPong => {
                if self.loop_start > self.loop_end || self.loop_end >= self.contents.len() {
                    return Err(Error::invalid_model("frame loop bounds out of range"));
                }
            }
            LoopType::TimeForward | LoopType::TimePingPong => {
                if self.loop_start > self.loop_end {
                    return Err(Error::invalid_model("time loop bounds out of range"));
                }
            }
            LoopType::None => {}
        }
        for block in &self.contents {
            block.validate()?;
        }
        Ok(())
    }

    pub fn frame_size(&self) -> usize {
        (self.frame_size_ms * 0.001 * self.mix_freq).round() as usize
    }

    pub fn frame_step(&self) -> usize {
        (self.frame_step_ms * 0.001 * self.mix_freq).round() as usize
    }
}

/// The encoder's transient float-valued mirror of `AudioBlock`, plus the original
/// complex spectrum and debug samples (never persisted).
#[derive(Clone, Debug, Default)]
pub struct EncoderBlock {
    pub freqs: Vec<f64>,
    pub mags: Vec<f64>,
    pub phases: Vec<f64>,
    pub noise: [f64; NOISE_BANDS],
    pub original_fft: Vec<num_complex::Complex64>,
    pub debug_samples: Option<Vec<f32>>,
}

impl EncoderBlock {
    pub fn quantize(&self, fundamental_freq: f64, mix_freq: f64, frame_size: usize, enable_phases: bool) -> AudioBlock {
        let mut freqs = Vec::with_capacity(self.freqs.len());
        let mut mags = Vec::with_capacity(self.freqs.len());
        let mut phases = Vec::new();
        if enable_phases {
            phases.reserve(self.freqs.len());
        }
        for i in 0..self.freqs.len() {
            if self.mags[i] <= 0.0 {
                continue; // drop zero-magnitude partials (sort_freqs step)
            }
            let rel_freq = self.freqs[i] / fundamental_freq;
            let ifreq = sm_freq2ifreq(rel_freq);
            freqs.push(ifreq);
            mags.push(sm_factor2idb(self.mags[i]));
            if enable_phases {
                let quant_freq = sm_ifreq2freq(ifreq) * fundamental_freq;
                let mut phase = self.phases[i]
                    - std::f64::consts::TAU * quant_freq / mix_freq * ((frame_size as f64 - 1.0) / 2.0);
                phase = phase.rem_euclid(std::f64::consts::TAU);
                phases.push((phase / std::f64::consts::TAU * 65536.0).round() as u16);
            }
        }
        let mut noise = [0u16; NOISE_BANDS];
        for (o, v) in noise.iter_mut().zip(self.noise.iter()) {
            *o = sm_factor2idb(*v);
        }
        AudioBlock {
            freqs,
            mags,
            phases,
            noise,
            env: Vec::new(),
            env_f0: 0.0,
        }
    }
}

/// A peak record used during partial linking: parallel-array friendly (no heap-node
/// linked list), indices stand in for the original's pointer-based prev/next chain.
#[derive(Clone, Copy, Debug)]
pub struct Tracksel {
    pub frame: usize,
    pub bin: usize,
    pub freq: f64,
    pub mag: f64,
    pub mag2_db: f64,
    pub phase: f64,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unsorted_freqs() {
        let block = AudioBlock {
            freqs: vec![10, 5],
            mags: vec![1, 1],
            ..Default::default()
        };
        assert!(block.validate().is_err());
    }

    #[test]
    fn validate_rejects_length_mismatch() {
        let block = AudioBlock {
            freqs: vec![1, 2],
            mags: vec![1],
            ..Default::default()
        };
        assert!(block.validate().is_err());
    }

    #[test]
    fn quantize_drops_zero_magnitude() {
        let eb = EncoderBlock {
            freqs: vec![440.0, 880.0],
            mags: vec![0.5, 0.0],
            phases: vec![0.0, 0.0],
            ..Default::default()
        };
        let ab = eb.quantize(440.0, 48000.0, 1024, false);
        assert_eq!(ab.n_partials(), 1);
    }
}
