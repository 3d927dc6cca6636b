//! Agreement statistics over a units-by-raters matrix.
//!
//! Every function takes one row per entity and one column per rater, with
//! `None` where the rater did not code the entity. Values are numeric codes:
//! 0/1 for binary, level rank for ordinal, the count itself for counts.
//! Chance-corrected statistics return [`UndefinedReason::InsufficientVariance`]
//! when every observed value is identical.

use std::collections::BTreeMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::Serialize;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    InsufficientVariance,
    InsufficientRaters,
    InsufficientSubjects,
}

impl fmt::Display for UndefinedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientVariance => write!(f, "insufficient variance"),
            Self::InsufficientRaters => write!(f, "insufficient raters"),
            Self::InsufficientSubjects => write!(f, "insufficient subjects"),
        }
    }
}

pub type StatResult = Result<f64, UndefinedReason>;

/// Rows of a units-by-raters matrix.
pub type Units = [Vec<Option<f64>>];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaLevel {
    Nominal,
    Ordinal,
    Interval,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Coded values of every unit with at least two of them.
pub fn pairable(units: &Units) -> Vec<Vec<f64>> {
    units
        .iter()
        .map(|u| u.iter().flatten().copied().collect::<Vec<_>>())
        .filter(|u| u.len() >= 2)
        .collect()
}

/// Units coded by every rater.
fn complete(units: &Units) -> Vec<Vec<f64>> {
    units
        .iter()
        .filter(|u| u.len() >= 2 && u.iter().all(Option::is_some))
        .map(|u| u.iter().flatten().copied().collect())
        .collect()
}

fn rater_count(units: &Units) -> usize {
    units.first().map_or(0, Vec::len)
}

/// True when no two observed values differ.
pub fn is_degenerate(rows: &[Vec<f64>]) -> bool {
    let mut values = rows.iter().flatten();
    match values.next() {
        Some(first) => values.all(|v| v == first),
        None => true,
    }
}

fn category_counts<'a>(values: impl Iterator<Item = &'a f64>) -> BTreeMap<OrderedFloat<f64>, f64> {
    let mut counts = BTreeMap::new();
    for v in values {
        *counts.entry(OrderedFloat(*v)).or_insert(0.0) += 1.0;
    }
    counts
}

fn bounded(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

fn two_rater_pairs(units: &Units) -> Result<Vec<(f64, f64)>, UndefinedReason> {
    if rater_count(units) != 2 {
        return Err(UndefinedReason::InsufficientRaters);
    }
    let pairs: Vec<_> = units
        .iter()
        .filter_map(|u| match (u[0], u[1]) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        })
        .collect();
    if pairs.is_empty() {
        return Err(UndefinedReason::InsufficientSubjects);
    }
    let rows: Vec<Vec<f64>> = pairs.iter().map(|(a, b)| vec![*a, *b]).collect();
    if is_degenerate(&rows) {
        return Err(UndefinedReason::InsufficientVariance);
    }
    Ok(pairs)
}

// ---------------------------------------------------------------------------
// Raw agreement
// ---------------------------------------------------------------------------

/// Agreeing rater pairs over all comparable pairs.
pub fn percent_agreement(units: &Units) -> StatResult {
    let rows = pairable(units);
    if rows.is_empty() {
        return Err(UndefinedReason::InsufficientSubjects);
    }
    let (mut agree, mut total) = (0usize, 0usize);
    for row in &rows {
        for i in 0..row.len() {
            for j in (i + 1)..row.len() {
                total += 1;
                if row[i] == row[j] {
                    agree += 1;
                }
            }
        }
    }
    Ok(agree as f64 / total as f64)
}

/// Share of units on which every contributing rater gave the same value.
pub fn unanimity_rate(units: &Units) -> StatResult {
    let rows = pairable(units);
    if rows.is_empty() {
        return Err(UndefinedReason::InsufficientSubjects);
    }
    let unanimous = rows
        .iter()
        .filter(|row| row.iter().all(|v| *v == row[0]))
        .count();
    Ok(unanimous as f64 / rows.len() as f64)
}

// ---------------------------------------------------------------------------
// Chance-corrected, two raters
// ---------------------------------------------------------------------------

pub fn cohen_kappa(units: &Units) -> StatResult {
    let pairs = two_rater_pairs(units)?;
    let n = pairs.len() as f64;

    let po = pairs.iter().filter(|(a, b)| a == b).count() as f64 / n;
    let left = category_counts(pairs.iter().map(|(a, _)| a));
    let right = category_counts(pairs.iter().map(|(_, b)| b));
    let pe: f64 = left
        .iter()
        .map(|(cat, count)| (count / n) * (right.get(cat).copied().unwrap_or(0.0) / n))
        .sum();

    if (1.0 - pe).abs() < EPSILON {
        return Err(UndefinedReason::InsufficientVariance);
    }
    Ok(bounded((po - pe) / (1.0 - pe)))
}

/// Cohen's kappa with linear weights `1 - |i - j| / (levels - 1)`.
pub fn weighted_kappa_linear(units: &Units, levels: usize) -> StatResult {
    if levels < 2 {
        return Err(UndefinedReason::InsufficientVariance);
    }
    let pairs = two_rater_pairs(units)?;
    let n = pairs.len() as f64;
    let span = (levels - 1) as f64;
    let rank = |v: f64| (v.max(0.0) as usize).min(levels - 1);
    let weight = |i: usize, j: usize| 1.0 - (i as f64 - j as f64).abs() / span;

    let mut left = vec![0.0; levels];
    let mut right = vec![0.0; levels];
    let mut po = 0.0;
    for (a, b) in &pairs {
        let (i, j) = (rank(*a), rank(*b));
        left[i] += 1.0;
        right[j] += 1.0;
        po += weight(i, j);
    }
    po /= n;

    let mut pe = 0.0;
    for i in 0..levels {
        for j in 0..levels {
            pe += weight(i, j) * (left[i] / n) * (right[j] / n);
        }
    }

    if (1.0 - pe).abs() < EPSILON {
        return Err(UndefinedReason::InsufficientVariance);
    }
    Ok(bounded((po - pe) / (1.0 - pe)))
}

// ---------------------------------------------------------------------------
// Chance-corrected, any number of raters
// ---------------------------------------------------------------------------

/// Gwet's AC1 over `categories` possible values, allowing a varying number
/// of raters per unit.
pub fn gwet_ac1(units: &Units, categories: usize) -> StatResult {
    let rows = pairable(units);
    if rows.is_empty() {
        return Err(UndefinedReason::InsufficientSubjects);
    }
    if categories < 2 || is_degenerate(&rows) {
        return Err(UndefinedReason::InsufficientVariance);
    }

    let n = rows.len() as f64;
    let mut pa = 0.0;
    let mut pi: BTreeMap<OrderedFloat<f64>, f64> = BTreeMap::new();
    for row in &rows {
        let r = row.len() as f64;
        let counts = category_counts(row.iter());
        pa += counts.values().map(|c| c * (c - 1.0)).sum::<f64>() / (r * (r - 1.0));
        for (cat, c) in counts {
            *pi.entry(cat).or_insert(0.0) += c / r;
        }
    }
    pa /= n;

    let pe = pi
        .values()
        .map(|total| {
            let p = total / n;
            p * (1.0 - p)
        })
        .sum::<f64>()
        / (categories as f64 - 1.0);

    if (1.0 - pe).abs() < EPSILON {
        return Err(UndefinedReason::InsufficientVariance);
    }
    Ok(bounded((pa - pe) / (1.0 - pe)))
}

/// Fleiss' kappa over units coded by every rater.
pub fn fleiss_kappa(units: &Units) -> StatResult {
    let k = rater_count(units);
    if k < 2 {
        return Err(UndefinedReason::InsufficientRaters);
    }
    let rows = complete(units);
    if rows.is_empty() {
        return Err(UndefinedReason::InsufficientSubjects);
    }
    if is_degenerate(&rows) {
        return Err(UndefinedReason::InsufficientVariance);
    }

    let n = rows.len() as f64;
    let kf = k as f64;
    let mut p_bar = 0.0;
    let mut totals: BTreeMap<OrderedFloat<f64>, f64> = BTreeMap::new();
    for row in &rows {
        let counts = category_counts(row.iter());
        p_bar += (counts.values().map(|c| c * c).sum::<f64>() - kf) / (kf * (kf - 1.0));
        for (cat, c) in counts {
            *totals.entry(cat).or_insert(0.0) += c;
        }
    }
    p_bar /= n;
    let pe: f64 = totals.values().map(|t| (t / (n * kf)).powi(2)).sum();

    if (1.0 - pe).abs() < EPSILON {
        return Err(UndefinedReason::InsufficientVariance);
    }
    Ok(bounded((p_bar - pe) / (1.0 - pe)))
}

/// Krippendorff's alpha via the coincidence matrix. Tolerates missing data.
pub fn krippendorff_alpha(units: &Units, level: AlphaLevel) -> StatResult {
    let rows = pairable(units);
    if rows.is_empty() {
        return Err(UndefinedReason::InsufficientSubjects);
    }

    let values: Vec<OrderedFloat<f64>> = category_counts(rows.iter().flatten())
        .into_keys()
        .collect();
    let q = values.len();
    if q < 2 {
        return Err(UndefinedReason::InsufficientVariance);
    }
    let index: BTreeMap<OrderedFloat<f64>, usize> =
        values.iter().enumerate().map(|(i, v)| (*v, i)).collect();

    let mut o = vec![vec![0.0; q]; q];
    for row in &rows {
        let m = row.len() as f64;
        for (i, a) in row.iter().enumerate() {
            for (j, b) in row.iter().enumerate() {
                if i != j {
                    o[index[&OrderedFloat(*a)]][index[&OrderedFloat(*b)]] += 1.0 / (m - 1.0);
                }
            }
        }
    }
    let marginals: Vec<f64> = o.iter().map(|row| row.iter().sum()).collect();
    let n: f64 = marginals.iter().sum();
    if n <= 1.0 {
        return Err(UndefinedReason::InsufficientSubjects);
    }

    let delta = |c: usize, k: usize| -> f64 {
        match level {
            AlphaLevel::Nominal => {
                if c == k {
                    0.0
                } else {
                    1.0
                }
            }
            AlphaLevel::Interval => (values[c].0 - values[k].0).powi(2),
            AlphaLevel::Ordinal => {
                let (lo, hi) = if c <= k { (c, k) } else { (k, c) };
                let between: f64 = marginals[lo..=hi].iter().sum();
                (between - (marginals[c] + marginals[k]) / 2.0).powi(2)
            }
        }
    };

    let mut observed = 0.0;
    let mut expected = 0.0;
    for c in 0..q {
        for k in 0..q {
            let d = delta(c, k);
            observed += o[c][k] * d;
            expected += marginals[c] * marginals[k] * d;
        }
    }
    if expected.abs() < EPSILON {
        return Err(UndefinedReason::InsufficientVariance);
    }
    Ok(1.0 - (n - 1.0) * observed / expected)
}

/// ICC(2,1): two-way random effects, absolute agreement, single rater, over
/// units coded by every rater.
pub fn icc_2_1(units: &Units, min_subjects: usize) -> StatResult {
    let k = rater_count(units);
    if k < 2 {
        return Err(UndefinedReason::InsufficientRaters);
    }
    let rows = complete(units);
    if rows.len() < min_subjects.max(2) {
        return Err(UndefinedReason::InsufficientSubjects);
    }

    let n = rows.len() as f64;
    let kf = k as f64;
    let grand = rows.iter().flatten().sum::<f64>() / (n * kf);
    let row_means: Vec<f64> = rows.iter().map(|r| r.iter().sum::<f64>() / kf).collect();
    let col_means: Vec<f64> = (0..k)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n)
        .collect();

    let ss_total: f64 = rows.iter().flatten().map(|v| (v - grand).powi(2)).sum();
    if ss_total.abs() < EPSILON {
        return Err(UndefinedReason::InsufficientVariance);
    }
    let ss_rows = kf * row_means.iter().map(|m| (m - grand).powi(2)).sum::<f64>();
    let ss_cols = n * col_means.iter().map(|m| (m - grand).powi(2)).sum::<f64>();
    let ss_error = ss_total - ss_rows - ss_cols;

    let ms_rows = ss_rows / (n - 1.0);
    let ms_cols = ss_cols / (kf - 1.0);
    let ms_error = ss_error / ((n - 1.0) * (kf - 1.0));

    let denominator = ms_rows + (kf - 1.0) * ms_error + kf * (ms_cols - ms_error) / n;
    if denominator.abs() < EPSILON {
        return Err(UndefinedReason::InsufficientVariance);
    }
    Ok(bounded((ms_rows - ms_error) / denominator))
}

/// Landis & Koch (1977) label for a chance-corrected statistic.
pub fn interpret(value: f64) -> &'static str {
    if value >= 0.81 {
        "Almost Perfect"
    } else if value >= 0.61 {
        "Substantial"
    } else if value >= 0.41 {
        "Moderate"
    } else if value >= 0.21 {
        "Fair"
    } else if value >= 0.0 {
        "Slight"
    } else {
        "Poor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two(a: &[i32], b: &[i32]) -> Vec<Vec<Option<f64>>> {
        a.iter()
            .zip(b)
            .map(|(x, y)| vec![Some(f64::from(*x)), Some(f64::from(*y))])
            .collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn percent_agreement_counts_pairs() {
        let units = vec![
            vec![Some(1.0), Some(1.0), Some(0.0)],
            vec![Some(0.0), Some(0.0), None],
            vec![Some(1.0), None, None],
        ];
        // unit 1: 1 of 3 pairs agree, unit 2: 1 of 1, unit 3 excluded
        assert!(close(percent_agreement(&units).unwrap(), 0.5));
        assert!(close(unanimity_rate(&units).unwrap(), 0.5));
    }

    #[test]
    fn kappa_textbook_example() {
        // 20 subjects: 10 both yes, 5 both no, 5 split (3 yes/no, 2 no/yes)
        let mut a = vec![1; 10];
        let mut b = vec![1; 10];
        a.extend([0; 5]);
        b.extend([0; 5]);
        a.extend([1, 1, 1, 0, 0]);
        b.extend([0, 0, 0, 1, 1]);
        let k = cohen_kappa(&two(&a, &b)).unwrap();
        // po = 0.75, pe = 0.65*0.6 + 0.35*0.4 = 0.53
        assert!(close(k, (0.75 - 0.53) / (1.0 - 0.53)));
    }

    #[test]
    fn kappa_perfect_and_opposite() {
        assert!(close(cohen_kappa(&two(&[1, 0, 1, 0], &[1, 0, 1, 0])).unwrap(), 1.0));
        assert!(close(cohen_kappa(&two(&[1, 0, 1, 0], &[0, 1, 0, 1])).unwrap(), -1.0));
    }

    #[test]
    fn all_agree_on_one_value_is_undefined() {
        let units = two(&[1, 1, 1], &[1, 1, 1]);
        assert_eq!(cohen_kappa(&units), Err(UndefinedReason::InsufficientVariance));
        assert_eq!(gwet_ac1(&units, 2), Err(UndefinedReason::InsufficientVariance));
        assert_eq!(
            krippendorff_alpha(&units, AlphaLevel::Nominal),
            Err(UndefinedReason::InsufficientVariance)
        );
        assert_eq!(fleiss_kappa(&units), Err(UndefinedReason::InsufficientVariance));
        assert_eq!(percent_agreement(&units), Ok(1.0));
    }

    #[test]
    fn ac1_stays_high_under_skew() {
        // 19 of 20 both 0, one split: kappa collapses, AC1 does not
        let mut a = vec![0; 19];
        let mut b = vec![0; 19];
        a.push(1);
        b.push(0);
        let units = two(&a, &b);
        let kappa = cohen_kappa(&units).unwrap();
        let ac1 = gwet_ac1(&units, 2).unwrap();
        assert!(close(kappa, 0.0));
        assert!(ac1 > 0.9);
        assert!((-1.0..=1.0).contains(&ac1));
    }

    #[test]
    fn ac1_two_rater_closed_form() {
        let units = two(&[1, 1, 0, 0, 1], &[1, 0, 0, 0, 1]);
        // pa = 0.8; pi(1) = 5/10 = 0.5; pe = 0.5*0.5*2 / 1 = 0.5
        assert!(close(gwet_ac1(&units, 2).unwrap(), (0.8 - 0.5) / 0.5));
    }

    #[test]
    fn weighted_kappa_rewards_near_misses() {
        let exact = weighted_kappa_linear(&two(&[0, 1, 2, 2], &[0, 1, 2, 2]), 3).unwrap();
        let near = weighted_kappa_linear(&two(&[0, 1, 2, 2], &[0, 2, 2, 1]), 3).unwrap();
        let far = weighted_kappa_linear(&two(&[0, 1, 2, 2], &[2, 1, 0, 0]), 3).unwrap();
        assert!(close(exact, 1.0));
        assert!(near > far);
    }

    #[test]
    fn fleiss_on_complete_units() {
        let units = vec![
            vec![Some(1.0), Some(1.0), Some(1.0)],
            vec![Some(0.0), Some(0.0), Some(0.0)],
            vec![Some(1.0), Some(0.0), Some(1.0)],
            vec![Some(1.0), Some(1.0), None],
        ];
        let k = fleiss_kappa(&units).unwrap();
        // P_i = 1, 1, 1/3 ; P_bar = 7/9 ; p1 = 5/9, p0 = 4/9
        let pe = (5.0f64 / 9.0).powi(2) + (4.0f64 / 9.0).powi(2);
        assert!(close(k, (7.0 / 9.0 - pe) / (1.0 - pe)));
    }

    #[test]
    fn alpha_nominal_perfect_and_missing_data() {
        let units = vec![
            vec![Some(1.0), Some(1.0), None],
            vec![Some(0.0), None, Some(0.0)],
            vec![None, Some(1.0), Some(1.0)],
            vec![Some(1.0), None, None],
        ];
        assert!(close(krippendorff_alpha(&units, AlphaLevel::Nominal).unwrap(), 1.0));
    }

    #[test]
    fn alpha_interval_penalizes_distance() {
        let near = two(&[1, 2, 3, 4], &[1, 2, 3, 5]);
        let far = two(&[1, 2, 3, 4], &[1, 2, 3, 9]);
        let a_near = krippendorff_alpha(&near, AlphaLevel::Interval).unwrap();
        let a_far = krippendorff_alpha(&far, AlphaLevel::Interval).unwrap();
        assert!(a_near > a_far);
        let ordinal = krippendorff_alpha(&near, AlphaLevel::Ordinal).unwrap();
        assert!(ordinal <= 1.0);
    }

    #[test]
    fn icc_needs_subjects_and_variance() {
        assert_eq!(
            icc_2_1(&two(&[1, 2], &[1, 2]), 3),
            Err(UndefinedReason::InsufficientSubjects)
        );
        assert_eq!(
            icc_2_1(&two(&[2, 2, 2], &[2, 2, 2]), 3),
            Err(UndefinedReason::InsufficientVariance)
        );
        assert!(close(icc_2_1(&two(&[1, 4, 7, 2], &[1, 4, 7, 2]), 3).unwrap(), 1.0));
        let noisy = icc_2_1(&two(&[1, 4, 7, 2], &[2, 4, 6, 2]), 3).unwrap();
        assert!(noisy > 0.8 && noisy < 1.0);
    }

    #[test]
    fn kappa_requires_two_raters() {
        let units = vec![vec![Some(1.0), Some(0.0), Some(1.0)]];
        assert_eq!(cohen_kappa(&units), Err(UndefinedReason::InsufficientRaters));
    }

    #[test]
    fn landis_koch_labels() {
        assert_eq!(interpret(-0.1), "Poor");
        assert_eq!(interpret(0.1), "Slight");
        assert_eq!(interpret(0.3), "Fair");
        assert_eq!(interpret(0.5), "Moderate");
        assert_eq!(interpret(0.7), "Substantial");
        assert_eq!(interpret(0.9), "Almost Perfect");
    }
}
