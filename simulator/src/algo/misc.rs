//! Small numerical helpers used by the optics model.
//!
//! - **Linear interpolation**: 1D interpolation over a sorted grid, validated once
//! - **Evenly spaced grids**: `linspace` for building sample times

use thiserror::Error;

/// Errors that can occur during interpolation operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("Value {0} is out of bounds for interpolation range [{1}, {2}]")]
    OutOfBounds(f64, f64, f64),
    #[error("Input vectors must have at least 2 points")]
    InsufficientData,
    #[error("Input vectors must have the same length")]
    MismatchedLengths,
    #[error("X values must be sorted in ascending order")]
    UnsortedData,
}

/// Piecewise-linear interpolator over a strictly increasing grid.
///
/// The grid is validated at construction so repeated lookups only pay for
/// the binary search.
#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearInterpolator {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, InterpError> {
        if xs.len() != ys.len() {
            return Err(InterpError::MismatchedLengths);
        }
        if xs.len() < 2 {
            return Err(InterpError::InsufficientData);
        }
        if xs.windows(2).any(|w| w[1] <= w[0]) {
            return Err(InterpError::UnsortedData);
        }
        Ok(Self { xs, ys })
    }

    /// Domain covered by the grid, inclusive on both ends
    pub fn range(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Interpolate at `x`; values outside the grid are an error, not an extrapolation.
    pub fn eval(&self, x: f64) -> Result<f64, InterpError> {
        let (min_x, max_x) = self.range();
        if !(min_x..=max_x).contains(&x) {
            return Err(InterpError::OutOfBounds(x, min_x, max_x));
        }

        let idx = match self.xs.binary_search_by(|probe| probe.total_cmp(&x)) {
            Ok(exact_idx) => return Ok(self.ys[exact_idx]),
            Err(insert_idx) => insert_idx,
        };

        let (x1, x2) = (self.xs[idx - 1], self.xs[idx]);
        let (y1, y2) = (self.ys[idx - 1], self.ys[idx]);
        let t = (x - x1) / (x2 - x1);
        Ok(y1 + t * (y2 - y1))
    }
}

/// One-shot linear interpolation; see [`LinearInterpolator`] for repeated queries.
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    LinearInterpolator::new(xs.to_vec(), ys.to_vec())?.eval(x)
}

/// `n` evenly spaced samples from `start` to `stop`, both inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let ys = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(interp(2.0, &xs, &ys).unwrap(), 20.0);
    }

    #[test]
    fn test_linear_interpolation() {
        let lerp = LinearInterpolator::new(vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]).unwrap();
        assert_eq!(lerp.eval(1.5).unwrap(), 15.0);
        assert_eq!(lerp.eval(2.5).unwrap(), 25.0);
        assert_eq!(lerp.eval(3.0).unwrap(), 30.0);
    }

    #[test]
    fn test_out_of_bounds() {
        let lerp = LinearInterpolator::new(vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]).unwrap();
        assert!(matches!(lerp.eval(0.5), Err(InterpError::OutOfBounds(_, _, _))));
        assert!(matches!(lerp.eval(3.5), Err(InterpError::OutOfBounds(_, _, _))));
    }

    #[test]
    fn test_invalid_grids() {
        assert_eq!(
            LinearInterpolator::new(vec![1.0, 2.0, 3.0], vec![10.0, 20.0]).unwrap_err(),
            InterpError::MismatchedLengths
        );
        assert_eq!(
            LinearInterpolator::new(vec![1.0], vec![10.0]).unwrap_err(),
            InterpError::InsufficientData
        );
        assert_eq!(
            LinearInterpolator::new(vec![2.0, 1.0, 3.0], vec![20.0, 10.0, 30.0]).unwrap_err(),
            InterpError::UnsortedData
        );
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 10.0, 6), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(linspace(5.0, 7.0, 1), vec![5.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}
