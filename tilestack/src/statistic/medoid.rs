//! Geometric medoid across bands.
//!
//! For each pixel the medoid picks one whole observation: the time step
//! whose band vector lies closest to the per-band median of the steps valid
//! in every band. All output bands come from that same step, which keeps
//! the spectral signature physically consistent, and the chosen index is
//! reported as provenance.

use super::reduce::median_of;
use super::{DistanceMetric, MedianConvention};
use crate::stack::ObservationStack;
use ndarray::{Array2, Array3};

/// Medoid values indexed `(band, y, x)` plus the chosen time index per
/// pixel. Pixels without a jointly valid step hold `NaN` and `-1`.
pub(crate) struct MedoidSelection {
    pub values: Array3<f64>,
    pub provenance: Array2<i64>,
}

pub(crate) fn medoid(
    stack: &ObservationStack,
    convention: MedianConvention,
    metric: DistanceMetric,
) -> MedoidSelection {
    let (rows, cols) = stack.shape();
    let bands = stack.bands().len();
    let steps = stack.len();
    let data = stack.data();
    let valid = stack.valid();

    let mut values = Array3::from_elem((bands, rows, cols), f64::NAN);
    let mut provenance = Array2::from_elem((rows, cols), -1i64);

    let mut candidates: Vec<usize> = Vec::with_capacity(steps);
    let mut scratch: Vec<f64> = Vec::with_capacity(steps);
    let mut centre: Vec<f64> = vec![0.0; bands];

    for y in 0..rows {
        for x in 0..cols {
            candidates.clear();
            candidates.extend((0..steps).filter(|&t| (0..bands).all(|b| valid[[t, b, y, x]])));
            if candidates.is_empty() {
                continue;
            }

            for (b, slot) in centre.iter_mut().enumerate() {
                scratch.clear();
                scratch.extend(candidates.iter().map(|&t| data[[t, b, y, x]]));
                *slot = median_of(&mut scratch, convention).unwrap_or(f64::NAN);
            }

            let mut best = candidates[0];
            let mut best_distance = f64::INFINITY;
            for &t in &candidates {
                let distance = metric.distance((0..bands).map(|b| (data[[t, b, y, x]], centre[b])));
                if distance < best_distance {
                    best = t;
                    best_distance = distance;
                }
            }

            for b in 0..bands {
                values[[b, y, x]] = data[[best, b, y, x]];
            }
            provenance[[y, x]] = best as i64;
        }
    }

    MedoidSelection { values, provenance }
}

impl DistanceMetric {
    /// Distance between paired coordinates.
    ///
    /// Euclidean distance is left squared; only the ordering matters here.
    pub(crate) fn distance(&self, pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
        match self {
            DistanceMetric::Euclidean => pairs.map(|(a, b)| (a - b) * (a - b)).sum(),
            DistanceMetric::Manhattan => pairs.map(|(a, b)| (a - b).abs()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::ObservationInfo;
    use crate::window::parse_date;
    use ndarray::Array4;

    fn stack(points: &[(f64, f64)], valid: &[(bool, bool)]) -> ObservationStack {
        let steps = points.len();
        let mut data = Array4::zeros((steps, 2, 1, 1));
        let mut mask = Array4::from_elem((steps, 2, 1, 1), false);
        for (t, (&(a, b), &(va, vb))) in points.iter().zip(valid).enumerate() {
            data[[t, 0, 0, 0]] = a;
            data[[t, 1, 0, 0]] = b;
            mask[[t, 0, 0, 0]] = va;
            mask[[t, 1, 0, 0]] = vb;
        }
        let observations = (0..steps)
            .map(|t| ObservationInfo {
                id: format!("obs{t}"),
                source: "ls8".to_string(),
                acquired: parse_date("2015-01-01").unwrap(),
            })
            .collect();
        ObservationStack::from_arrays(vec!["red".into(), "nir".into()], observations, data, mask)
            .unwrap()
    }

    #[test]
    fn test_medoid_picks_observation_nearest_median() {
        let s = stack(
            &[(1.0, 1.0), (2.0, 2.0), (100.0, 100.0)],
            &[(true, true); 3],
        );
        let selection = medoid(&s, MedianConvention::Lower, DistanceMetric::Euclidean);

        assert_eq!(selection.provenance[[0, 0]], 1);
        assert_eq!(selection.values[[0, 0, 0]], 2.0);
        assert_eq!(selection.values[[1, 0, 0]], 2.0);
    }

    #[test]
    fn test_medoid_ignores_partially_valid_steps() {
        // Step 1 would be the medoid but its nir band is masked.
        let s = stack(
            &[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0), (50.0, 50.0)],
            &[(true, true), (true, false), (true, true), (true, true)],
        );
        let selection = medoid(&s, MedianConvention::Lower, DistanceMetric::Euclidean);

        assert_eq!(selection.provenance[[0, 0]], 2);
        assert_eq!(selection.values[[0, 0, 0]], 3.0);
    }

    #[test]
    fn test_medoid_tie_takes_lowest_index() {
        let s = stack(&[(5.0, 5.0), (5.0, 5.0)], &[(true, true); 2]);
        let selection = medoid(&s, MedianConvention::Lower, DistanceMetric::Manhattan);
        assert_eq!(selection.provenance[[0, 0]], 0);
    }

    #[test]
    fn test_medoid_without_valid_steps() {
        let s = stack(&[(1.0, 1.0)], &[(false, true)]);
        let selection = medoid(&s, MedianConvention::Lower, DistanceMetric::Euclidean);
        assert_eq!(selection.provenance[[0, 0]], -1);
        assert!(selection.values[[0, 0, 0]].is_nan());
    }

    #[test]
    fn test_distance_metrics() {
        let pairs = || [(0.0, 3.0), (0.0, 4.0)].into_iter();
        assert_eq!(DistanceMetric::Euclidean.distance(pairs()), 25.0);
        assert_eq!(DistanceMetric::Manhattan.distance(pairs()), 7.0);
    }
}
