//! Fixed-point conversion tables and fast approximations.
//!
//! `idb`/`ifreq` are the quantized encodings stored in an `AudioBlock`. The reverse
//! mappings (`idb2factor`, `ifreq2freq`) are hot on the decoder's render path, so they
//! are implemented via the two-level 256x256 split-table decomposition rather than a
//! direct `exp`/`powf` call per sample. The split is possible because both underlying
//! scalar functions are additive in their integer argument:
//! `idb2factor_slow(a + b) == idb2factor_slow(a) * idb2factor_slow(b)`.

use once_cell::sync::Lazy;

const FREQ_FAC: f64 = 6000.0;
const FREQ_ADD: f64 = 3.0 * FREQ_FAC;

/// `dB = 20 * log10(factor)`, clamped to the representable range before quantization.
#[inline]
pub fn db_from_factor(factor: f64, min_db: f64) -> f64 {
    if factor < 1e-25 {
        min_db
    } else {
        (20.0 * factor.log10()).max(min_db)
    }
}

#[inline]
pub fn db_to_factor(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

#[inline]
fn idb2factor_slow(idb: u32) -> f64 {
    let db = idb as f64 / 64.0 - 512.0;
    db_to_factor(db)
}

#[inline]
fn ifreq2freq_slow(ifreq: f64) -> f64 {
    ((ifreq - FREQ_ADD) / FREQ_FAC).exp()
}

/// Quantize a linear magnitude factor into the 16-bit `idb` encoding.
#[inline]
pub fn sm_factor2idb(factor: f64) -> u16 {
    let db = db_from_factor(factor, -500.0);
    let idb = (db * 64.0 + 512.0 * 64.0).round();
    idb.clamp(0.0, 65535.0) as u16
}

#[inline]
pub fn sm_factor2idbs(factors: &[f64], out: &mut [u16]) {
    for (f, o) in factors.iter().zip(out.iter_mut()) {
        *o = sm_factor2idb(*f);
    }
}

/// Quantize a frequency (Hz, typically relative to fundamental) into the 16-bit `ifreq`
/// log-scaled encoding.
#[inline]
pub fn sm_freq2ifreq(freq: f64) -> u16 {
    let ifreq = (freq.ln() * FREQ_FAC + FREQ_ADD).round();
    ifreq.clamp(0.0, 65535.0) as u16
}

#[inline]
pub fn sm_freq2ifreqs(freqs: &[f64], out: &mut [u16]) {
    for (f, o) in freqs.iter().zip(out.iter_mut()) {
        *o = sm_freq2ifreq(*f);
    }
}

struct SplitTable {
    high: [f64; 256],
    low: [f64; 256],
}

static IDB_TABLE: Lazy<SplitTable> = Lazy::new(|| {
    let mut high = [0.0; 256];
    let mut low = [0.0; 256];
    for i in 0..256 {
        high[i] = idb2factor_slow((i * 256) as u32);
        low[i] = idb2factor_slow(64 * 512 + i as u32);
    }
    SplitTable { high, low }
});

static IFREQ_TABLE: Lazy<SplitTable> = Lazy::new(|| {
    let mut high = [0.0; 256];
    let mut low = [0.0; 256];
    for i in 0..256 {
        high[i] = ifreq2freq_slow((i * 256) as f64);
        low[i] = ifreq2freq_slow(FREQ_ADD + i as f64);
    }
    SplitTable { high, low }
});

/// Dequantize `idb` back to a linear magnitude factor. Representation error is bounded
/// to <= 0.0009 relative (see the crate's end-to-end tests).
#[inline]
pub fn sm_idb2factor(idb: u16) -> f64 {
    let table = &*IDB_TABLE;
    table.high[(idb >> 8) as usize] * table.low[(idb & 0xff) as usize]
}

/// Dequantize `ifreq` back to a frequency in Hz. Error is bounded to <= +/-0.08 cent.
#[inline]
pub fn sm_ifreq2freq(ifreq: u16) -> f64 {
    let table = &*IFREQ_TABLE;
    table.high[(ifreq >> 8) as usize] * table.low[(ifreq & 0xff) as usize]
}

// Horner-form degree-6 polynomial approximating log2 on the mantissa, shifted from
// [1,2) to [0,1). Coefficients from the original fixed-point math table construction.
const LOG2_C: [f64; 6] = [
    -0.0259366993544709205147977455165,
    0.122047857676447181074792747821,
    -0.278142976850643277139777529163,
    0.457647123003200929921054608995,
    -0.718161056646240150872259945510,
    1.44254540258782520489769598315,
];

/// A fast approximation of `log2(x)` for `x > 0`, accurate to <= 3.8e-6 absolute over
/// `x in [1e-7, 1]` (and by extension, any positive float via the exponent extraction
/// below). Exact at powers of two.
#[inline]
pub fn fast_log2(x: f32) -> f32 {
    let bits = x.to_bits();
    let exponent = ((bits >> 23) & 0xff) as i32 - 127;
    let mantissa_bits = (bits & 0x007f_ffff) | 0x3f80_0000; // mantissa in [1,2)
    let m = f32::from_bits(mantissa_bits) - 1.0;

    let p = LOG2_C[0] as f32;
    let p = p * m + LOG2_C[1] as f32;
    let p = p * m + LOG2_C[2] as f32;
    let p = p * m + LOG2_C[3] as f32;
    let p = p * m + LOG2_C[4] as f32;
    let p = p * m + LOG2_C[5] as f32;
    let p = p * m;

    exponent as f32 + p
}

#[inline]
pub fn fast_log2_block(xs: &[f32], out: &mut [f32]) {
    for (x, o) in xs.iter().zip(out.iter_mut()) {
        *o = fast_log2(*x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idb_round_trip() {
        for exp in -20..20 {
            let factor = 10f64.powi(exp).max(1e-25);
            let idb = sm_factor2idb(factor);
            let back = sm_idb2factor(idb);
            assert!(
                (back / factor - 1.0).abs() < 0.0009,
                "factor={factor} back={back}"
            );
        }
    }

    #[test]
    fn ifreq_round_trip() {
        let mut freq = 0.05;
        while freq < 9500.0 {
            let ifreq = sm_freq2ifreq(freq);
            let back = sm_ifreq2freq(ifreq);
            let cents = 1200.0 * (back / freq).log2();
            assert!(cents.abs() < 0.08, "freq={freq} back={back} cents={cents}");
            freq *= 1.3;
        }
    }

    #[test]
    fn fast_log2_accurate() {
        let mut x: f32 = 1e-7;
        while x <= 1.0 {
            let approx = fast_log2(x);
            let exact = x.log2();
            assert!((approx - exact).abs() < 3.8e-6, "x={x} approx={approx} exact={exact}");
            x *= 1.7;
        }
    }

    #[test]
    fn fast_log2_exact_at_powers_of_two() {
        for e in -10..10 {
            let x = 2f32.powi(e);
            assert!((fast_log2(x) - e as f32).abs() < 1e-5);
        }
    }

    #[test]
    fn block_matches_scalar() {
        let xs = [1.0f32, 2.0, 0.5, 3.3, 0.01];
        let mut out = [0.0f32; 5];
        fast_log2_block(&xs, &mut out);
        for (x, o) in xs.iter().zip(out.iter()) {
            assert_eq!(*o, fast_log2(*x));
        }
    }

    #[test]
    fn block_factor2idb_matches_scalar() {
        let factors = [0.001, 0.5, 1.0, 2.0];
        let mut out = [0u16; 4];
        sm_factor2idbs(&factors, &mut out);
        for (f, o) in factors.iter().zip(out.iter()) {
            assert_eq!(*o, sm_factor2idb(*f));
        }
    }
}
