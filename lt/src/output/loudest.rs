//! Retention of the loudest triggers by two rankings

use std::collections::BTreeSet;

use crate::domain::TriggerSet;

/// Chi-squared-weighted re-ranking of a single trigger
///
/// The SNR is returned unchanged while the reduced chi-squared is at most 1.
pub fn new_snr(snr: f64, chisq: f64, chisq_dof: f64) -> f64 {
    let denom = 2.0 * chisq_dof - 2.0;
    if denom <= 0.0 {
        return snr;
    }
    let rchisq = chisq / denom;
    if rchisq <= 1.0 {
        snr
    } else {
        snr * ((1.0 + rchisq.powi(3)) / 2.0).powf(-1.0 / 6.0)
    }
}

/// Indices of the `k` largest values, largest first
fn top_k(values: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    order.truncate(k);
    order
}

/// Union of the top-`k` indices by re-ranked SNR and by raw SNR, ascending
///
/// Returns None when the set lacks `snr`, `chisq` or `chisq_dof`.
pub fn loudest_union(set: &TriggerSet, k: usize) -> Option<Vec<usize>> {
    let snr = set.get("snr")?;
    let chisq = set.get("chisq")?;
    let dof = set.get("chisq_dof")?;

    let ranked: Vec<f64> = snr
        .iter()
        .zip(chisq)
        .zip(dof)
        .map(|((&s, &c), &d)| new_snr(s, c, d))
        .collect();

    let union: BTreeSet<usize> = top_k(&ranked, k).into_iter().chain(top_k(snr, k)).collect();
    Some(union.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn set(snr: &[f64], chisq: &[f64], dof: &[f64]) -> TriggerSet {
        let arrays: BTreeMap<String, Vec<f64>> = [
            ("snr".to_string(), snr.to_vec()),
            ("chisq".to_string(), chisq.to_vec()),
            ("chisq_dof".to_string(), dof.to_vec()),
        ]
        .into_iter()
        .collect();
        TriggerSet::new(arrays).unwrap()
    }

    #[test]
    fn test_new_snr_unchanged_for_good_fit() {
        assert_eq!(new_snr(10.0, 10.0, 11.0), 10.0);
        assert_eq!(new_snr(10.0, 50.0, 1.0), 10.0);
    }

    #[test]
    fn test_new_snr_penalizes_bad_fit() {
        // rchisq = 40 / 20 = 2 -> factor ((1 + 8) / 2)^(-1/6)
        let expected = 10.0 * 4.5f64.powf(-1.0 / 6.0);
        assert!((new_snr(10.0, 40.0, 11.0) - expected).abs() < 1e-12);
        assert!(new_snr(10.0, 40.0, 11.0) < 10.0);
    }

    #[test]
    fn test_union_can_exceed_k() {
        // Index 0 is loudest by raw SNR but has a terrible fit; index 1 is
        // loudest after re-ranking.
        let triggers = set(&[20.0, 12.0, 5.0], &[2000.0, 10.0, 10.0], &[11.0, 11.0, 11.0]);

        let retained = loudest_union(&triggers, 1).unwrap();
        assert_eq!(retained, vec![0, 1]);
    }

    #[test]
    fn test_union_with_large_k_keeps_everything() {
        let triggers = set(&[1.0, 2.0], &[1.0, 1.0], &[2.0, 2.0]);
        assert_eq!(loudest_union(&triggers, 10).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_missing_arrays() {
        let arrays: BTreeMap<String, Vec<f64>> = [("snr".to_string(), vec![1.0])].into_iter().collect();
        let triggers = TriggerSet::new(arrays).unwrap();
        assert_eq!(loudest_union(&triggers, 3), None);
    }
}
