//! Real/complex FFT wrappers with the engine's half-complex packing convention.
//!
//! Packing: a real-to-complex forward transform of length `n` naturally produces
//! `n/2 + 1` complex bins, of which bin 0 (DC) and bin `n/2` (Nyquist) are always
//! real-valued. Rather than waste half a complex slot on each, the packed `n`-float
//! layout used throughout this crate is: `out[0] = Re(bin 0)`, `out[1] = Re(bin n/2)`,
//! and for `k in 1..n/2`, `out[2k] = Re(bin k)`, `out[2k+1] = Im(bin k)`.
//!
//! Plans are built once per length and cached behind a mutex; the cache is only ever
//! populated from non-RT call sites (warmed via `precompute_tables` or the first
//! encoder/decoder call for a given size) per the engine's concurrency model.

use num_complex::Complex32;
use once_cell::sync::Lazy;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct RealPlans {
    planner: RealFftPlanner<f32>,
    forward: HashMap<usize, Arc<dyn RealToComplex<f32>>>,
    inverse: HashMap<usize, Arc<dyn ComplexToReal<f32>>>,
}

impl RealPlans {
    fn new() -> Self {
        RealPlans {
            planner: RealFftPlanner::new(),
            forward: HashMap::new(),
            inverse: HashMap::new(),
        }
    }

    fn forward(&mut self, n: usize) -> Arc<dyn RealToComplex<f32>> {
        self.forward
            .entry(n)
            .or_insert_with(|| self.planner.plan_fft_forward(n))
            .clone()
    }

    fn inverse(&mut self, n: usize) -> Arc<dyn ComplexToReal<f32>> {
        self.inverse
            .entry(n)
            .or_insert_with(|| self.planner.plan_fft_inverse(n))
            .clone()
    }
}

static REAL_PLANS: Lazy<Mutex<RealPlans>> = Lazy::new(|| Mutex::new(RealPlans::new()));

struct ComplexPlans {
    planner: FftPlanner<f32>,
    forward: HashMap<usize, Arc<dyn Fft<f32>>>,
    inverse: HashMap<usize, Arc<dyn Fft<f32>>>,
}

static COMPLEX_PLANS: Lazy<Mutex<ComplexPlans>> = Lazy::new(|| {
    Mutex::new(ComplexPlans {
        planner: FftPlanner::new(),
        forward: HashMap::new(),
        inverse: HashMap::new(),
    })
});

fn pack(spectrum: &[Complex32], out: &mut [f32]) {
    let n = out.len();
    out[0] = spectrum[0].re;
    out[1] = spectrum[n / 2].re;
    for k in 1..n / 2 {
        out[2 * k] = spectrum[k].re;
        out[2 * k + 1] = spectrum[k].im;
    }
}

fn unpack(packed: &[f32], spectrum: &mut [Complex32]) {
    let n = packed.len();
    spectrum[0] = Complex32::new(packed[0], 0.0);
    spectrum[n / 2] = Complex32::new(packed[1], 0.0);
    for k in 1..n / 2 {
        spectrum[k] = Complex32::new(packed[2 * k], packed[2 * k + 1]);
    }
}

/// Real-to-complex forward transform. `input.len() == output.len() == n`.
pub fn fftar(input: &[f32], output: &mut [f32]) {
    let n = input.len();
    assert_eq!(output.len(), n);
    let mut plans = REAL_PLANS.lock().unwrap();
    let plan = plans.forward(n);
    let mut in_buf = plan.make_input_vec();
    in_buf.copy_from_slice(input);
    let mut spectrum = plan.make_output_vec();
    plan.process(&mut in_buf, &mut spectrum).expect("fft forward");
    pack(&spectrum, output);
}

/// Complex-to-real inverse transform, non-destructive with respect to `input`.
pub fn fftsr(input: &[f32], output: &mut [f32]) {
    let mut scratch = input.to_vec();
    fftsr_destructive(&mut scratch, output);
}

/// Complex-to-real inverse transform. May overwrite `input` as scratch space.
pub fn fftsr_destructive(input: &mut [f32], output: &mut [f32]) {
    let n = output.len();
    assert_eq!(input.len(), n);
    let mut plans = REAL_PLANS.lock().unwrap();
    let plan = plans.inverse(n);
    let mut spectrum = plan.make_input_vec();
    unpack(input, &mut spectrum);
    plan.process(&mut spectrum, output).expect("fft inverse");
    // realfft's C2R inverse is unnormalized; normalize to match forward/inverse round trip.
    let scale = 1.0 / n as f32;
    for v in output.iter_mut() {
        *v *= scale;
    }
}

/// Complex-to-complex forward transform, in place.
pub fn fftac(data: &mut [Complex32]) {
    let n = data.len();
    let mut plans = COMPLEX_PLANS.lock().unwrap();
    let fft = plans
        .forward
        .entry(n)
        .or_insert_with(|| plans.planner.plan_fft_forward(n))
        .clone();
    fft.process(data);
}

/// Complex-to-complex inverse transform, in place (unnormalized, matching `fftac`'s
/// forward convention: `fftsc(fftac(x)) == n * x`).
pub fn fftsc(data: &mut [Complex32]) {
    let n = data.len();
    let mut plans = COMPLEX_PLANS.lock().unwrap();
    let fft = plans
        .inverse
        .entry(n)
        .or_insert_with(|| plans.planner.plan_fft_inverse(n))
        .clone();
    fft.process(data);
}

/// Warms the process-wide plan cache for `n` from a non-RT thread. Called by
/// `LiveDecoder::precompute_tables` and by the encoder before its first frame.
pub fn precompute_plans(n: usize) {
    let mut plans = REAL_PLANS.lock().unwrap();
    plans.forward(n);
    plans.inverse(n);
}

/// The wisdom-file hook described in the engine's FFT interface. `rustfft`/`realfft`
/// plans have no persistable representation (unlike FFTW), so these are documented
/// no-ops kept for API compatibility with callers that warm the cache ahead of a
/// real-time deadline via a wisdom file path.
pub fn load_wisdom(_path: &std::path::Path) -> crate::Result<bool> {
    Ok(false)
}

pub fn save_wisdom(_path: &std::path::Path) -> crate::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_real() {
        let n = 64;
        let input: Vec<f32> = (0..n)
            .map(|i| (i as f32 * 0.37).sin() + 0.2 * (i as f32 * 1.9).cos())
            .collect();
        let mut packed = vec![0.0; n];
        fftar(&input, &mut packed);
        let mut out = vec![0.0; n];
        fftsr(&packed, &mut out);
        for (a, b) in input.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn pure_tone_peak_bin() {
        let n = 256;
        let bin = 10;
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n as f32).sin())
            .collect();
        let mut packed = vec![0.0; n];
        fftar(&input, &mut packed);
        let mut spectrum = vec![Complex32::new(0.0, 0.0); n / 2 + 1];
        unpack(&packed, &mut spectrum);
        let mags: Vec<f32> = spectrum.iter().map(|c| c.norm()).collect();
        let (peak_bin, _) = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(peak_bin, bin);
    }

    #[test]
    fn complex_round_trip() {
        let n = 32;
        let mut data: Vec<Complex32> = (0..n)
            .map(|i| Complex32::new((i as f32 * 0.3).sin(), (i as f32 * 0.2).cos()))
            .collect();
        let original = data.clone();
        fftac(&mut data);
        fftsc(&mut data);
        for (a, b) in original.iter().zip(data.iter()) {
            assert!((a.re - b.re / n as f32).abs() < 1e-3);
            assert!((a.im - b.im / n as f32).abs() < 1e-3);
        }
    }
}
