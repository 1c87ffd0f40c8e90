//! Sines-plus-noise spectral modeling for a software synthesizer voice: an offline
//! [`encoder::Encoder`] turns a recorded sample into a compact [`block::Audio`] model,
//! and a real-time [`decoder::LiveDecoder`] resynthesizes it with pitch control,
//! portamento, vibrato, unison, looping, and formant correction.

pub mod block;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fft;
pub mod formant;
pub mod ifft_synth;
pub mod math;
pub mod noise_band;
pub mod polyphase;
pub mod random;
pub mod resampler;
pub mod rt_memory;
pub mod smooth;
pub mod wavset;
pub mod window;

pub use block::{Audio, AudioBlock, LoopType};
pub use decoder::{DecoderState, LiveDecoder};
pub use encoder::{Encoder, EncoderParams, OptLevel};
pub use error::{Error, Result};
pub use formant::{FormantCorrection, FormantMode};
pub use wavset::{WavSet, WavSetWave};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_pure_tone_through_encoder_and_decoder() {
        let mix_freq = 48000.0;
        let freq = 440.0;
        let n = (mix_freq * 0.3) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| (std::f64::consts::TAU * freq * i as f64 / mix_freq).sin() as f32)
            .collect();

        let params = EncoderParams {
            mix_freq,
            fundamental_freq: freq,
            ..Default::default()
        };
        let mut encoder = Encoder::new(params).unwrap();
        encoder.encode(&samples, OptLevel::Refine, true).unwrap();
        let audio = encoder.save_as_audio().unwrap();
        assert!(!audio.contents.is_empty());

        let mut decoder = LiveDecoder::new(mix_freq);
        decoder.set_noise_seed(Some(1));
        decoder.retrigger(audio, freq, 100);

        let mut out = vec![0.0f32; 8192];
        let freq_in = vec![freq; out.len()];
        decoder.process(&freq_in, &mut out);

        let energy: f64 = out.iter().map(|&v| (v as f64) * (v as f64)).sum();
        assert!(energy > 0.0, "resynthesized signal should not be silent");
    }

    #[test]
    fn silent_input_round_trips_to_silence() {
        let mix_freq = 48000.0;
        let params = EncoderParams {
            mix_freq,
            fundamental_freq: 440.0,
            ..Default::default()
        };
        let mut encoder = Encoder::new(params).unwrap();
        let samples = vec![0.0f32; (mix_freq * 0.2) as usize];
        encoder.encode(&samples, OptLevel::Refine, false).unwrap();
        let audio = encoder.save_as_audio().unwrap();

        let mut decoder = LiveDecoder::new(mix_freq);
        decoder.retrigger(audio, 440.0, 100);
        let mut out = vec![1.0f32; 4096];
        let freq_in = vec![440.0; out.len()];
        decoder.process(&freq_in, &mut out);
        let peak = out.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak < 1e-3, "peak={peak}");
    }
}
