//! Per-band reductions along the time axis.
//!
//! Every function takes one band's values and validity, indexed
//! `(time, y, x)`, and returns a `(y, x)` array in which pixels without any
//! valid observation hold `NaN`. Casting to the output dtype and nodata
//! substitution happen afterwards.

use super::MedianConvention;
use ndarray::{Array2, ArrayView3, Axis, Zip};

/// Sum and count of valid values per pixel.
fn accumulate(data: ArrayView3<'_, f64>, valid: ArrayView3<'_, bool>) -> (Array2<f64>, Array2<u32>) {
    let (_, rows, cols) = data.dim();
    let mut sum = Array2::<f64>::zeros((rows, cols));
    let mut count = Array2::<u32>::zeros((rows, cols));

    for (layer, mask) in data.outer_iter().zip(valid.outer_iter()) {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(&layer)
            .and(&mask)
            .for_each(|s, c, &v, &ok| {
                if ok {
                    *s += v;
                    *c += 1;
                }
            });
    }
    (sum, count)
}

pub(crate) fn mean(data: ArrayView3<'_, f64>, valid: ArrayView3<'_, bool>) -> Array2<f64> {
    let (sum, count) = accumulate(data, valid);
    Zip::from(&sum)
        .and(&count)
        .map_collect(|&s, &c| if c == 0 { f64::NAN } else { s / c as f64 })
}

pub(crate) fn count(valid: ArrayView3<'_, bool>) -> Array2<f64> {
    valid.map_axis(Axis(0), |lane| lane.iter().filter(|&&v| v).count() as f64)
}

/// Population standard deviation.
pub(crate) fn std(data: ArrayView3<'_, f64>, valid: ArrayView3<'_, bool>) -> Array2<f64> {
    let means = mean(data, valid);
    let (_, rows, cols) = data.dim();
    let mut squares = Array2::<f64>::zeros((rows, cols));

    for (layer, mask) in data.outer_iter().zip(valid.outer_iter()) {
        Zip::from(&mut squares)
            .and(&means)
            .and(&layer)
            .and(&mask)
            .for_each(|sq, &m, &v, &ok| {
                if ok {
                    *sq += (v - m) * (v - m);
                }
            });
    }

    let counts = count(valid);
    Zip::from(&squares).and(&counts).map_collect(|&sq, &c| {
        if c == 0.0 {
            f64::NAN
        } else {
            (sq / c).sqrt()
        }
    })
}

pub(crate) fn min(data: ArrayView3<'_, f64>, valid: ArrayView3<'_, bool>) -> Array2<f64> {
    extreme(data, valid, |candidate, current| candidate < current)
}

pub(crate) fn max(data: ArrayView3<'_, f64>, valid: ArrayView3<'_, bool>) -> Array2<f64> {
    extreme(data, valid, |candidate, current| candidate > current)
}

fn extreme(
    data: ArrayView3<'_, f64>,
    valid: ArrayView3<'_, bool>,
    better: impl Fn(f64, f64) -> bool,
) -> Array2<f64> {
    let (_, rows, cols) = data.dim();
    let mut out = Array2::from_elem((rows, cols), f64::NAN);

    for (layer, mask) in data.outer_iter().zip(valid.outer_iter()) {
        Zip::from(&mut out)
            .and(&layer)
            .and(&mask)
            .for_each(|o, &v, &ok| {
                if ok && (o.is_nan() || better(v, *o)) {
                    *o = v;
                }
            });
    }
    out
}

pub(crate) fn median(
    data: ArrayView3<'_, f64>,
    valid: ArrayView3<'_, bool>,
    convention: MedianConvention,
) -> Array2<f64> {
    let (steps, rows, cols) = data.dim();
    let mut scratch = Vec::with_capacity(steps);

    Array2::from_shape_fn((rows, cols), |(y, x)| {
        scratch.clear();
        for t in 0..steps {
            if valid[[t, y, x]] {
                scratch.push(data[[t, y, x]]);
            }
        }
        median_of(&mut scratch, convention).unwrap_or(f64::NAN)
    })
}

/// Median of `values`, reordering the slice in place.
///
/// With an even count the lower or upper of the two middle values is
/// returned, never their average, so the result is always an observed value.
pub(crate) fn median_of(values: &mut [f64], convention: MedianConvention) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let index = match convention {
        MedianConvention::Lower => (n - 1) / 2,
        MedianConvention::Upper => n / 2,
    };
    let (_, value, _) = values.select_nth_unstable_by(index, f64::total_cmp);
    Some(*value)
}
