//! High-quality fractional-sample interpolation from a finite signal.
//!
//! A single process-wide table of 64x-oversampled, width-7 windowed-sinc coefficients
//! is built once and shared read-only by every voice (portamento resampling) and by
//! `MiniResampler`. The coefficient table itself is synthesized here from a
//! Blackman-windowed sinc at module-init time; the reference coefficient set used by
//! the original engine was not available, only its construction shape (oversample
//! factor, width, fast/slow boundary-aware lookup), so this crate derives an
//! equivalent table rather than inventing arbitrary numbers.

use once_cell::sync::Lazy;

const OVERSAMPLE: i64 = 64;
const WIDTH: i64 = 7;

struct Table {
    x: Vec<f64>,
    filter_center: i64,
}

fn sinc(t: f64) -> f64 {
    if t.abs() < 1e-12 {
        1.0
    } else {
        let p = std::f64::consts::PI * t;
        p.sin() / p
    }
}

fn blackman_window(x: f64) -> f64 {
    crate::window::blackman(x)
}

static TABLE: Lazy<Table> = Lazy::new(|| {
    let len = (WIDTH * 2 * OVERSAMPLE + 1) as usize;
    let filter_center = (len / 2) as i64;
    let mut x = vec![0.0; len];
    for (p, slot) in x.iter_mut().enumerate() {
        let offset = p as i64 - filter_center;
        let t = offset as f64 / OVERSAMPLE as f64;
        let w = blackman_window((t / WIDTH as f64).clamp(-1.0, 1.0));
        *slot = sinc(t) * w;
    }
    Table { x, filter_center }
});

#[inline]
fn sig(signal: &[f32], pos: i64) -> f64 {
    if pos >= 0 && (pos as usize) < signal.len() {
        signal[pos as usize] as f64
    } else {
        0.0
    }
}

/// The minimum number of in-bounds samples of padding this interpolator needs on each
/// side of a position it's asked to evaluate, for its fast (boundary-unchecked) path.
pub fn min_padding() -> usize {
    WIDTH as usize
}

/// Fractional-sample lookup at `pos` (which may be negative or past the end; out-of-
/// bounds taps read as 0).
pub fn get_sample(signal: &[f32], pos: f64) -> f64 {
    let table = &*TABLE;
    let ipos: i64 = if pos < 0.0 {
        pos as i64 - 1
    } else {
        pos as i64
    };
    let frac64 = ((pos - ipos as f64) * OVERSAMPLE as f64) as i64;
    let x_frac = (pos - ipos as f64) * OVERSAMPLE as f64 - frac64 as f64;

    let mut result = 0.0;
    let mut j = -WIDTH;
    let mut p = table.filter_center + j * OVERSAMPLE - frac64;
    while p < 0 {
        p += OVERSAMPLE;
        j += 1;
    }
    if p == 0 {
        result += sig(signal, ipos + j) * table.x[p as usize] * (1.0 - x_frac);
        p += OVERSAMPLE;
        j += 1;
    }

    let fast_path = ipos > WIDTH && ipos + WIDTH < signal.len() as i64;
    while (p as usize) < table.x.len() {
        let inter_x = table.x[p as usize] * (1.0 - x_frac) + table.x[(p - 1) as usize] * x_frac;
        let sample = if fast_path {
            signal[(ipos + j) as usize] as f64
        } else {
            sig(signal, ipos + j)
        };
        result += sample * inter_x;
        p += OVERSAMPLE;
        j += 1;
    }
    result
}

/// Same as `get_sample` but assumes the caller has already guaranteed `min_padding()`
/// samples of slack on both sides (used by the decoder's portamento buffer, which
/// maintains that invariant explicitly).
pub fn get_sample_no_check(signal: &[f32], pos: f64) -> f64 {
    get_sample(signal, pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduces_exact_samples_at_integer_positions() {
        let signal: Vec<f32> = (0..64).map(|i| (i as f32 * 0.1).sin()).collect();
        for i in 20..40 {
            let got = get_sample(&signal, i as f64);
            assert!(
                (got - signal[i] as f64).abs() < 1e-6,
                "i={i} got={got} want={}",
                signal[i]
            );
        }
    }

    #[test]
    fn out_of_bounds_reads_as_zero_tail() {
        let signal: Vec<f32> = vec![1.0; 8];
        let got = get_sample(&signal, 1000.0);
        assert!(got.abs() < 1e-6);
    }

    #[test]
    fn interpolates_smoothly_between_samples() {
        let signal: Vec<f32> = (0..64).map(|i| (i as f32 * 0.05).sin()).collect();
        let a = get_sample(&signal, 30.0);
        let b = get_sample(&signal, 30.5);
        let c = get_sample(&signal, 31.0);
        assert!((b - (a + c) / 2.0).abs() < 0.05);
    }
}
