//! Night grouping of time-sorted observations.

/// Consecutive observations closer than `gap_days` share a night.
///
/// Returns `(n_obs_nights, night_times)` where `night_times` is the mean
/// observation time of each night. `times` must be sorted ascending.
pub fn group_nights(times: &[f64], gap_days: f64) -> (Vec<usize>, Vec<f64>) {
    let mut counts: Vec<usize> = Vec::new();
    let mut sums: Vec<f64> = Vec::new();
    let mut prev: Option<f64> = None;
    for &t in times {
        match prev {
            Some(p) if t - p < gap_days => {
                if let (Some(c), Some(s)) = (counts.last_mut(), sums.last_mut()) {
                    *c += 1;
                    *s += t;
                }
            }
            _ => {
                counts.push(1);
                sums.push(t);
            }
        }
        prev = Some(t);
    }
    let mids = sums.iter().zip(&counts).map(|(s, c)| s / *c as f64).collect();
    (counts, mids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_split_nights() {
        let t = [0.0, 0.1, 0.2, 1.0, 1.05, 3.0];
        let (n, mid) = group_nights(&t, 0.5);
        assert_eq!(n, vec![3, 2, 1]);
        assert!((mid[0] - 0.1).abs() < 1e-12);
        assert!((mid[1] - 1.025).abs() < 1e-12);
        assert_eq!(mid[2], 3.0);
    }

    #[test]
    fn no_observations_no_nights() {
        let (n, mid) = group_nights(&[], 0.5);
        assert!(n.is_empty() && mid.is_empty());
    }
}
