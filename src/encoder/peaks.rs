//! Peak detection, frame-to-frame linking, and chain validation.

use crate::block::Tracksel;
use crate::window::WindowType;

/// A detected spectral peak within one STFT frame, before linking.
#[derive(Clone, Copy, Debug)]
pub struct Peak {
    pub freq: f64,
    pub mag: f64,
    pub mag2_db: f64,
    pub phase: f64,
}

fn quadratic_interp(y0: f64, y1: f64, y2: f64) -> (f64, f64) {
    // Returns (x_max relative to the center bin, interpolated peak value).
    let denom = y0 - 2.0 * y1 + y2;
    if denom.abs() < 1e-15 {
        return (0.0, y1);
    }
    let x = 0.5 * (y0 - y2) / denom;
    let x = x.clamp(-0.5, 0.5);
    let peak = y1 - 0.25 * (y0 - y2) * x;
    (x, peak)
}

/// Detect peaks in one frame's magnitude spectrum (`mags[0..=n/2]`, linear magnitude,
/// already global-max-normalized is not required here: normalization against the
/// corpus-wide max happens in `search_local_maxima`).
pub struct PeakSearchParams {
    pub mix_freq: f64,
    pub frame_size: usize,
    pub block_size: usize,
    pub zeropad: usize,
    pub peak_width_threshold: f64,
    pub window: WindowType,
    pub window_weight: f64,
}

impl Default for PeakSearchParams {
    fn default() -> Self {
        PeakSearchParams {
            mix_freq: 48000.0,
            frame_size: 1024,
            block_size: 4096,
            zeropad: 4,
            peak_width_threshold: 2.9,
            window: WindowType::BlackmanHarris92,
            window_weight: 0.0,
        }
    }
}

/// Search one frame's spectrum for sine peaks, given its complex bins (`re`/`im`,
/// length `n/2+1`) and the corpus-wide max magnitude for normalization.
pub fn search_local_maxima(
    re: &[f64],
    im: &[f64],
    max_mag: f64,
    params: &PeakSearchParams,
) -> Vec<Peak> {
    let n = re.len();
    let mags: Vec<f64> = re.iter().zip(im.iter()).map(|(r, i)| (r * r + i * i).sqrt()).collect();
    let window_scale = 2.0 / params.window_weight;
    let epsilon_fact = 1.0 + 1e-8;
    let mut peaks = Vec::new();

    let mut d = 1;
    while d + 1 < n {
        let is_single = mags[d] > mags[d - 1] && mags[d] > mags[d + 1];
        let is_double = d + 2 < n
            && mags[d] * epsilon_fact >= mags[d + 1]
            && mags[d + 1] * epsilon_fact >= mags[d]
            && mags[d] > mags[d - 1]
            && mags[d + 1] > mags[d + 2];

        if !is_single && !is_double {
            d += 1;
            continue;
        }

        let center = d;
        let half_max = mags[center] * 0.5;
        let mut ds = center;
        while ds > 0 && mags[ds] > half_max {
            ds -= 1;
        }
        let mut de = center;
        while de + 1 < n && mags[de] > half_max {
            de += 1;
        }
        let normalized_peak_width =
            (de - ds) as f64 * params.frame_size as f64 / (params.block_size * params.zeropad) as f64;

        if normalized_peak_width <= params.peak_width_threshold {
            d += if is_double { 2 } else { 1 };
            continue;
        }

        let db_mags: Vec<f64> = [center - 1, center, center + 1]
            .iter()
            .map(|&k| crate::math::db_from_factor(mags[k] / max_mag.max(1e-30), -100.0))
            .collect();
        let (x_max, _) = quadratic_interp(db_mags[0], db_mags[1], db_mags[2]);

        let tfreq = (center as f64 + x_max) * params.mix_freq / (params.block_size * params.zeropad) as f64;

        let (re_i, _) = quadratic_interp(re[center - 1], re[center], re[center + 1]);
        let re_at = re[center] + (re[center + 1] - re[center - 1]) * 0.5 * x_max;
        let im_at = im[center] + (im[center + 1] - im[center - 1]) * 0.5 * x_max;
        let _ = re_i;
        let mut phase = im_at.atan2(re_at) + std::f64::consts::FRAC_PI_2;
        phase -= ((params.frame_size as f64 - 1.0) / 2.0) / params.mix_freq * tfreq * std::f64::consts::TAU;
        phase = phase.rem_euclid(std::f64::consts::TAU);

        let mag2_db = crate::math::db_from_factor(mags[center] / max_mag.max(1e-30), -100.0);
        let mag = mags[center] * window_scale;

        if mag2_db > -90.0 && tfreq > 10.0 {
            peaks.push(Peak {
                freq: tfreq,
                mag,
                mag2_db,
                phase,
            });
        }

        d += if is_double { 2 } else { 1 };
    }
    peaks
}

/// Link peaks across consecutive frames by nearest frequency, 5% relative threshold.
/// Returns, for each frame, a `Vec<Option<usize>>` giving the index in the next frame
/// each peak links forward to (or `None`).
pub fn link_partials(frames: &[Vec<Peak>]) -> Vec<Vec<Option<usize>>> {
    let mut forward_links = vec![Vec::new(); frames.len()];
    if frames.len() < 2 {
        return forward_links;
    }

    for f in 0..frames.len() - 1 {
        let cur = &frames[f];
        let next = &frames[f + 1];

        let mut cur_order: Vec<usize> = (0..cur.len()).collect();
        cur_order.sort_by(|&a, &b| cur[a].freq.partial_cmp(&cur[b].freq).unwrap());
        let mut next_order: Vec<usize> = (0..next.len()).collect();
        next_order.sort_by(|&a, &b| next[a].freq.partial_cmp(&next[b].freq).unwrap());

        let mut links = vec![None; cur.len()];
        // best[j] = (delta, cur_index) for next-frame peak j (by sorted position)
        let mut best: Vec<Option<(f64, usize)>> = vec![None; next_order.len()];

        let mut ni = 0usize;
        for &ci in &cur_order {
            let freq = cur[ci].freq;
            while ni + 1 < next_order.len() && next[next_order[ni + 1]].freq < freq {
                ni += 1;
            }
            // candidate is whichever of ni / ni+1 is closer
            let mut best_j = ni;
            if ni + 1 < next_order.len() {
                let d0 = (next[next_order[ni]].freq - freq).abs();
                let d1 = (next[next_order[ni + 1]].freq - freq).abs();
                if d1 < d0 {
                    best_j = ni + 1;
                }
            }
            let target_freq = next[next_order[best_j]].freq;
            let delta = (target_freq - freq).abs() / freq.max(1e-9);
            if delta < 0.05 {
                let better = match best[best_j] {
                    None => true,
                    Some((prev_delta, _)) => delta < prev_delta,
                };
                if better {
                    best[best_j] = Some((delta, ci));
                }
            }
        }

        for (j, slot) in best.into_iter().enumerate() {
            if let Some((_, ci)) = slot {
                links[ci] = Some(next_order[j]);
            }
        }
        forward_links[f] = links;
    }
    forward_links
}

/// Traverse forward-linked chains; keep a chain iff its loudest peak exceeds -90 dB.
/// Returns, for each frame, the set of peak indices that survive (i.e. are part of a
/// validated chain).
pub fn validate_partials(frames: &[Vec<Peak>], forward_links: &[Vec<Option<usize>>]) -> Vec<Vec<bool>> {
    let mut visited: Vec<Vec<bool>> = frames.iter().map(|f| vec![false; f.len()]).collect();
    let mut keep: Vec<Vec<bool>> = frames.iter().map(|f| vec![false; f.len()]).collect();

    for f in 0..frames.len() {
        for p in 0..frames[f].len() {
            if visited[f][p] {
                continue;
            }
            // Walk the chain starting at (f, p), marking as visited and tracking peak mag.
            let mut chain = vec![(f, p)];
            visited[f][p] = true;
            let mut biggest = frames[f][p].mag2_db;
            let mut cur = (f, p);
            while cur.0 < forward_links.len() {
                if let Some(next_p) = forward_links[cur.0].get(cur.1).copied().flatten() {
                    let next = (cur.0 + 1, next_p);
                    if visited[next.0][next.1] {
                        break;
                    }
                    visited[next.0][next.1] = true;
                    biggest = biggest.max(frames[next.0][next.1].mag2_db);
                    chain.push(next);
                    cur = next;
                } else {
                    break;
                }
            }
            if biggest > -90.0 {
                for (cf, cp) in chain {
                    keep[cf][cp] = true;
                }
            }
        }
    }
    keep
}

pub fn tracksels_from_chains(frames: &[Vec<Peak>], forward_links: &[Vec<Option<usize>>]) -> Vec<Vec<Tracksel>> {
    let mut prevs: Vec<Vec<Option<usize>>> = frames.iter().map(|f| vec![None; f.len()]).collect();
    for f in 0..forward_links.len() {
        for (ci, link) in forward_links[f].iter().enumerate() {
            if let Some(next_p) = link {
                prevs[f + 1][*next_p] = Some(ci);
            }
        }
    }
    frames
        .iter()
        .enumerate()
        .map(|(f, peaks)| {
            peaks
                .iter()
                .enumerate()
                .map(|(bin, peak)| Tracksel {
                    frame: f,
                    bin,
                    freq: peak.freq,
                    mag: peak.mag,
                    mag2_db: peak.mag2_db,
                    phase: peak.phase,
                    prev: prevs[f][bin],
                    next: forward_links.get(f).and_then(|l| l.get(bin).copied()).flatten(),
                })
                .collect()
        })
        .collect()
}
