//! Analysis window functions, evaluated over `x in [-1, 1]`; zero outside that range.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowType {
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris92,
}

#[inline]
pub fn cos_window(x: f64) -> f64 {
    if !(-1.0..=1.0).contains(&x) {
        return 0.0;
    }
    0.5 - 0.5 * (std::f64::consts::PI * (x + 1.0)).cos()
}

#[inline]
pub fn hamming(x: f64) -> f64 {
    if !(-1.0..=1.0).contains(&x) {
        return 0.0;
    }
    0.54 - 0.46 * (std::f64::consts::PI * (x + 1.0)).cos()
}

#[inline]
pub fn blackman(x: f64) -> f64 {
    if !(-1.0..=1.0).contains(&x) {
        return 0.0;
    }
    let p = std::f64::consts::PI * (x + 1.0);
    0.42 - 0.5 * p.cos() + 0.08 * (2.0 * p).cos()
}

const BH92_A0: f64 = 0.35875;
const BH92_A1: f64 = 0.48829;
const BH92_A2: f64 = 0.14128;
const BH92_A3: f64 = 0.01168;

#[inline]
pub fn blackman_harris_92(x: f64) -> f64 {
    if !(-1.0..=1.0).contains(&x) {
        return 0.0;
    }
    let p = std::f64::consts::PI * (x + 1.0);
    BH92_A0 - BH92_A1 * p.cos() + BH92_A2 * (2.0 * p).cos() - BH92_A3 * (3.0 * p).cos()
}

impl WindowType {
    #[inline]
    pub fn eval(self, x: f64) -> f64 {
        match self {
            WindowType::Hann => cos_window(x),
            WindowType::Hamming => hamming(x),
            WindowType::Blackman => blackman(x),
            WindowType::BlackmanHarris92 => blackman_harris_92(x),
        }
    }

    pub fn from_name(name: &str) -> crate::Result<WindowType> {
        match name {
            "hann" | "cos" => Ok(WindowType::Hann),
            "hamming" => Ok(WindowType::Hamming),
            "blackman" => Ok(WindowType::Blackman),
            "blackman_harris_92" | "bh92" => Ok(WindowType::BlackmanHarris92),
            other => Err(crate::Error::invalid_parameter(format!(
                "unsupported window: {other}"
            ))),
        }
    }
}

/// Fills `out` with `window(i)` for `n` samples centered at `x = -1..1`, used by the
/// encoder's STFT framing and by table construction in `ifft_synth`/`noise_band`.
pub fn fill_window(window: WindowType, out: &mut [f64]) {
    let n = out.len();
    if n == 0 {
        return;
    }
    for (i, o) in out.iter_mut().enumerate() {
        let x = 2.0 * i as f64 / (n - 1).max(1) as f64 - 1.0;
        *o = window.eval(x);
    }
}

pub fn window_weight(window: WindowType, n: usize) -> f64 {
    let mut buf = vec![0.0; n];
    fill_window(window, &mut buf);
    buf.iter().sum()
}

pub fn window_weight_sq(window: WindowType, n: usize) -> f64 {
    let mut buf = vec![0.0; n];
    fill_window(window, &mut buf);
    buf.iter().map(|w| w * w).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_outside_range() {
        assert_eq!(cos_window(1.5), 0.0);
        assert_eq!(blackman_harris_92(-2.0), 0.0);
    }

    #[test]
    fn hann_endpoints_zero_center_one() {
        assert!((cos_window(-1.0)).abs() < 1e-12);
        assert!((cos_window(1.0)).abs() < 1e-12);
        assert!((cos_window(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bh92_peak_at_center() {
        let center = blackman_harris_92(0.0);
        assert!((center - (BH92_A0 + BH92_A1 + BH92_A2 + BH92_A3)).abs() < 1e-12);
    }
}
