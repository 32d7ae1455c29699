use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::{Record, BOOKMARKS, LIKES, REPLIES, REPOSTS, VIEWS};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuzzWeights {
    pub likes: f64,
    pub reposts: f64,
}

impl Default for BuzzWeights {
    fn default() -> Self {
        Self { likes: 2.0, reposts: 5.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepWeights {
    pub bookmarks: f64,
    pub replies: f64,
}

impl Default for KeepWeights {
    fn default() -> Self {
        Self { bookmarks: 5.0, replies: 4.0 }
    }
}

/// Tunables for buzz/keep scoring. Every field has a default, so a TOML file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreOptions {
    pub half_life_buzz_hours: f64,
    pub half_life_keep_hours: f64,
    pub buzz_weights: BuzzWeights,
    pub keep_weights: KeepWeights,
    pub z: f64,
    pub debug: bool,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self {
            half_life_buzz_hours: 72.0,
            half_life_keep_hours: 36.0,
            buzz_weights: BuzzWeights::default(),
            keep_weights: KeepWeights::default(),
            z: 1.96,
            debug: false,
        }
    }
}

impl ScoreOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read score config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid score config {}", path.display()))
    }
}

/// Intermediate statistics, kept only in debug mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreDebug {
    pub wlb_likes: f64,
    pub wlb_reposts: f64,
    pub wlb_replies: f64,
    pub wlb_bookmarks: f64,
    pub buzz_raw: f64,
    pub keep_raw: f64,
    pub buzz_z: f64,
    pub keep_z: f64,
    pub keep_orth_z: f64,
    pub keep_buzz_corr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    #[serde(flatten)]
    pub item: Record,
    pub age_hours: f64,
    pub buzz: f64,
    pub keep: f64,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub debug: Option<ScoreDebug>,
}

struct Derived {
    age_hours: f64,
    wlb_likes: f64,
    wlb_reposts: f64,
    wlb_replies: f64,
    wlb_bookmarks: f64,
    buzz_raw: f64,
    keep_raw: f64,
}

/// Wilson score interval lower bound for `k` successes in `n` trials.
pub fn wilson_lower_bound(k: u64, n: u64, z: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let phat = (k as f64 / n).min(1.0);
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let inner = (phat * (1.0 - phat) + z2 / (4.0 * n)) / n;
    let num = phat + z2 / (2.0 * n) - z * inner.max(0.0).sqrt();
    (num / denom).max(0.0)
}

/// Weight remaining after `age_hours` with the given half-life.
pub fn decay(age_hours: f64, half_life_hours: f64) -> f64 {
    if !age_hours.is_finite() || half_life_hours <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * age_hours / half_life_hours).exp()
}

pub fn age_hours(date: Option<&str>, now: DateTime<Utc>) -> f64 {
    date.and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| {
            let ms = (now - d.with_timezone(&Utc)).num_milliseconds() as f64;
            (ms / 3_600_000.0).max(0.0)
        })
        .unwrap_or(0.0)
}

/// Population z-scores; a constant or empty batch gets a deviation of 1.
pub fn zscores(xs: &[f64]) -> Vec<f64> {
    if xs.is_empty() {
        return Vec::new();
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let sd = if var.sqrt() > 0.0 { var.sqrt() } else { 1.0 };
    xs.iter().map(|x| (x - mean) / sd).collect()
}

/// Pearson correlation clamped to [-1, 1]; 0 when either side is constant.
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let nf = n as f64;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&xi, &yi) in x.iter().zip(y) {
        sx += xi;
        sy += yi;
        sxx += xi * xi;
        syy += yi * yi;
        sxy += xi * yi;
    }
    let (mx, my) = (sx / nf, sy / nf);
    let vx = sxx / nf - mx * mx;
    let vy = syy / nf - my * my;
    let cov = sxy / nf - mx * my;
    let denom = (vx * vy).sqrt();
    if denom > 0.0 {
        (cov / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Min-max scale into [lo, hi]; a flat batch uses a span of 1.
pub fn min_max_scale(xs: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if max > min { max - min } else { 1.0 };
    xs.iter().map(|x| lo + (x - min) / span * (hi - lo)).collect()
}

fn round_to(x: f64, places: i32) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let f = 10f64.powi(places);
    (x * f).round() / f
}

fn derive(item: &Record, now: DateTime<Utc>, opts: &ScoreOptions) -> Derived {
    let views = item.metric(VIEWS);
    let age_hours = age_hours(item.date.as_deref(), now);

    let wlb_likes = wilson_lower_bound(item.metric(LIKES), views, opts.z);
    let wlb_reposts = wilson_lower_bound(item.metric(REPOSTS), views, opts.z);
    let wlb_replies = wilson_lower_bound(item.metric(REPLIES), views, opts.z);
    let wlb_bookmarks = wilson_lower_bound(item.metric(BOOKMARKS), views, opts.z);

    let buzz_base = opts.buzz_weights.reposts * wlb_reposts + opts.buzz_weights.likes * wlb_likes;
    let keep_base =
        opts.keep_weights.bookmarks * wlb_bookmarks + opts.keep_weights.replies * wlb_replies;

    Derived {
        age_hours,
        wlb_likes,
        wlb_reposts,
        wlb_replies,
        wlb_bookmarks,
        buzz_raw: buzz_base * decay(age_hours, opts.half_life_buzz_hours),
        keep_raw: keep_base * decay(age_hours, opts.half_life_keep_hours),
    }
}

/// Score a whole batch. Scores are relative to the batch, so this always
/// runs over the full capture at once.
pub fn score(items: &[Record], now: DateTime<Utc>, opts: &ScoreOptions) -> Vec<ScoredItem> {
    let derived: Vec<Derived> = items.par_iter().map(|it| derive(it, now, opts)).collect();

    let buzz_raw: Vec<f64> = derived.iter().map(|d| d.buzz_raw).collect();
    let keep_raw: Vec<f64> = derived.iter().map(|d| d.keep_raw).collect();
    let buzz_z = zscores(&buzz_raw);
    let keep_z = zscores(&keep_raw);

    // Remove the part of keep that buzz already explains.
    let corr = correlation(&keep_z, &buzz_z);
    let keep_orth_z: Vec<f64> = keep_z
        .iter()
        .zip(&buzz_z)
        .map(|(k, b)| k - corr * b)
        .collect();

    let buzz = min_max_scale(&buzz_z, 0.0, 100.0);
    let keep = min_max_scale(&keep_orth_z, 0.0, 100.0);

    items
        .iter()
        .zip(derived)
        .enumerate()
        .map(|(i, (item, d))| {
            let mut item = item.clone();
            for key in [VIEWS, LIKES, REPOSTS, REPLIES, BOOKMARKS] {
                item.metrics.entry(key.to_string()).or_insert(0);
            }
            let debug = opts.debug.then(|| ScoreDebug {
                wlb_likes: d.wlb_likes,
                wlb_reposts: d.wlb_reposts,
                wlb_replies: d.wlb_replies,
                wlb_bookmarks: d.wlb_bookmarks,
                buzz_raw: d.buzz_raw,
                keep_raw: d.keep_raw,
                buzz_z: round_to(buzz_z[i], 4),
                keep_z: round_to(keep_z[i], 4),
                keep_orth_z: round_to(keep_orth_z[i], 4),
                keep_buzz_corr: round_to(corr, 4),
            });
            ScoredItem {
                item,
                age_hours: d.age_hours,
                buzz: round_to(buzz[i], 2),
                keep: round_to(keep[i], 2),
                debug,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2025-10-26T12:00:00Z".parse().unwrap()
    }

    fn item(link: &str, date: &str, m: [u64; 5]) -> Record {
        let mut r = Record::new(link);
        r.date = Some(date.into());
        for (key, n) in [LIKES, REPOSTS, REPLIES, BOOKMARKS, VIEWS].into_iter().zip(m) {
            r.raise_metric(key, n);
        }
        r
    }

    /// a: viral and recent, b: bookmarked and discussed, c: an older copy of a.
    fn batch() -> Vec<Record> {
        vec![
            item("a", "2025-10-26T11:00:00.000Z", [500, 200, 20, 10, 10000]),
            item("b", "2025-10-26T11:00:00.000Z", [50, 5, 200, 150, 10000]),
            item("c", "2025-10-20T11:00:00.000Z", [500, 200, 20, 10, 10000]),
        ]
    }

    fn find<'a>(scored: &'a [ScoredItem], link: &str) -> &'a ScoredItem {
        scored.iter().find(|s| s.item.link == link).unwrap()
    }

    #[test]
    fn wilson_bounds() {
        assert_eq!(wilson_lower_bound(5, 0, 1.96), 0.0);
        assert!(wilson_lower_bound(0, 100, 1.96) < 1e-9);
        let low_n = wilson_lower_bound(1, 2, 1.96);
        let high_n = wilson_lower_bound(500, 1000, 1.96);
        assert!(low_n < high_n, "{low_n} vs {high_n}");
        assert!(high_n < 0.5 && high_n > 0.46);
        // k > n is capped at a ratio of 1
        assert!(wilson_lower_bound(50, 10, 1.96) <= 1.0);
    }

    #[test]
    fn decay_halves_at_half_life() {
        assert!((decay(72.0, 72.0) - 0.5).abs() < 1e-12);
        assert_eq!(decay(0.0, 36.0), 1.0);
        assert_eq!(decay(10.0, 0.0), 1.0);
    }

    #[test]
    fn age_clamped_and_defaulted() {
        assert_eq!(age_hours(None, now()), 0.0);
        assert_eq!(age_hours(Some("not a date"), now()), 0.0);
        assert_eq!(age_hours(Some("2025-10-27T12:00:00Z"), now()), 0.0);
        assert!((age_hours(Some("2025-10-26T09:30:00Z"), now()) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn stats_helpers() {
        assert_eq!(zscores(&[3.0, 3.0]), [0.0, 0.0]);
        assert!(zscores(&[]).is_empty());
        assert_eq!(zscores(&[1.0, 3.0]), [-1.0, 1.0]);
        assert!((correlation(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-9);
        assert_eq!(correlation(&[1.0, 1.0], &[2.0, 5.0]), 0.0);
        assert_eq!(min_max_scale(&[2.0, 2.0], 0.0, 100.0), [0.0, 0.0]);
        assert_eq!(min_max_scale(&[-1.0, 0.0, 1.0], 0.0, 100.0), [0.0, 50.0, 100.0]);
    }

    #[test]
    fn scores_bounded() {
        let scored = score(&batch(), now(), &ScoreOptions::default());
        assert_eq!(scored.len(), 3);
        for s in &scored {
            assert!((0.0..=100.0).contains(&s.buzz), "buzz {}", s.buzz);
            assert!((0.0..=100.0).contains(&s.keep), "keep {}", s.keep);
        }
    }

    #[test]
    fn single_and_empty_batches() {
        assert!(score(&[], now(), &ScoreOptions::default()).is_empty());
        let one = score(&batch()[..1], now(), &ScoreOptions::default());
        assert_eq!((one[0].buzz, one[0].keep), (0.0, 0.0));
    }

    #[test]
    fn axes_separate() {
        let scored = score(&batch(), now(), &ScoreOptions::default());
        let (a, b) = (find(&scored, "a"), find(&scored, "b"));
        assert!(a.buzz > b.buzz);
        assert!(b.keep > a.keep);
    }

    #[test]
    fn older_item_decays() {
        let scored = score(&batch(), now(), &ScoreOptions::default());
        let (a, c) = (find(&scored, "a"), find(&scored, "c"));
        assert!(c.buzz <= a.buzz);
        assert!(c.keep <= a.keep);
        assert!(c.age_hours > a.age_hours);
    }

    #[test]
    fn debug_fields_only_when_asked() {
        let plain = score(&batch(), now(), &ScoreOptions::default());
        let v = serde_json::to_value(&plain[0]).unwrap();
        assert!(v.get("buzz_z").is_none());
        assert!(v.get("wlb_likes").is_none());
        assert_eq!(v["bookmarks"], 10);
        assert!(v["buzz"].is_number());

        let opts = ScoreOptions { debug: true, ..Default::default() };
        let debug = score(&batch(), now(), &opts);
        let v = serde_json::to_value(&debug[0]).unwrap();
        assert!(v["buzz_z"].is_number());
        assert!(v["keep_orth_z"].is_number());
        assert!(v["keep_buzz_corr"].as_f64().unwrap() < 0.0);
    }

    #[test]
    fn missing_metrics_default_to_zero() {
        let mut bare = Record::new("bare");
        bare.date = Some("2025-10-26T11:00:00Z".into());
        let scored = score(&[bare], now(), &ScoreOptions::default());
        for key in [VIEWS, LIKES, REPOSTS, REPLIES, BOOKMARKS] {
            assert_eq!(scored[0].item.metric(key), 0);
            assert!(scored[0].item.metrics.contains_key(key));
        }
    }

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let opts: ScoreOptions = toml::from_str(
            "half_life_buzz_hours = 24.0\n[keep_weights]\nreplies = 1.0\n",
        )
        .unwrap();
        assert_eq!(opts.half_life_buzz_hours, 24.0);
        assert_eq!(opts.half_life_keep_hours, 36.0);
        assert_eq!(opts.keep_weights.replies, 1.0);
        assert_eq!(opts.keep_weights.bookmarks, 5.0);
        assert_eq!(opts.z, 1.96);
    }
}
