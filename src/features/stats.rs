// =============================================================================
// Statistical primitives shared by the feature computers
// =============================================================================
//
// Pure, side-effect-free helpers. Degenerate inputs return `None` so callers
// are forced to handle the insufficient-data path.

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation. `None` for an empty slice.
pub fn stddev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    let sd = variance.sqrt();
    if sd.is_finite() {
        Some(sd)
    } else {
        None
    }
}

/// Least-squares regression slope of `values` against indices 0..n.
///
/// `None` when fewer than two points are supplied.
pub fn least_squares_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = mean(values)?;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den.abs() < f64::EPSILON {
        return None;
    }
    let slope = num / den;
    if slope.is_finite() {
        Some(slope)
    } else {
        None
    }
}

/// Z-score of `value` against the rolling `window`.
///
/// `None` when the window is empty or has zero dispersion.
pub fn z_score(value: f64, window: &[f64]) -> Option<f64> {
    let m = mean(window)?;
    let sd = stddev(window)?;
    if sd < f64::EPSILON {
        return None;
    }
    let z = (value - m) / sd;
    if z.is_finite() {
        Some(z)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_stddev_known_values() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values).unwrap() - 5.0).abs() < 1e-10);
        assert!((stddev(&values).unwrap() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn slope_of_linear_series_is_exact() {
        let values: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        assert!((least_squares_slope(&values).unwrap() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn slope_of_flat_series_is_zero() {
        let values = vec![5.0; 10];
        assert!(least_squares_slope(&values).unwrap().abs() < 1e-10);
    }

    #[test]
    fn degenerate_inputs_are_none() {
        assert!(mean(&[]).is_none());
        assert!(least_squares_slope(&[1.0]).is_none());
        assert!(z_score(1.0, &[2.0, 2.0, 2.0]).is_none());
    }

    #[test]
    fn z_score_known_value() {
        let window = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // mean 5, sd 2 -> value 9 has z = 2.
        assert!((z_score(9.0, &window).unwrap() - 2.0).abs() < 1e-10);
    }
}
